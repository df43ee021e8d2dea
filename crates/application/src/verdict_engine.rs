//! Turns a resolved mark into a kernel verdict call, with retry, statistics
//! and in-flight tracking.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use domain::queue::entity::QueueStats;
use domain::verdict::entity::{BaseVerdict, Mark};
use domain::verdict::error::VerdictError;
use tokio::sync::Notify;

use crate::interception_queue::QueueShared;
use crate::retry::retry_transient;

/// Per-queue outcome counters. Each field is an independent atomic.
#[derive(Debug, Default)]
pub struct VerdictCounters {
    total: AtomicU64,
    accept: AtomicU64,
    block: AtomicU64,
    drop: AtomicU64,
    accept_always: AtomicU64,
    block_always: AtomicU64,
    drop_always: AtomicU64,
    errors: AtomicU64,
}

impl VerdictCounters {
    pub fn record_received(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mark(&self, mark: Mark) {
        let counter = match mark {
            Mark::Accept => &self.accept,
            Mark::Block => &self.block,
            Mark::Drop => &self.drop,
            Mark::AcceptAlways => &self.accept_always,
            Mark::BlockAlways => &self.block_always,
            Mark::DropAlways => &self.drop_always,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> QueueStats {
        QueueStats {
            total: self.total.load(Ordering::Relaxed),
            accept: self.accept.load(Ordering::Relaxed),
            block: self.block.load(Ordering::Relaxed),
            drop: self.drop.load(Ordering::Relaxed),
            accept_always: self.accept_always.load(Ordering::Relaxed),
            block_always: self.block_always.load(Ordering::Relaxed),
            drop_always: self.drop_always.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Count of verdict calls currently inside the kernel binding.
#[derive(Debug, Default)]
pub struct PendingVerdicts {
    count: AtomicUsize,
    completed: Notify,
}

impl PendingVerdicts {
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn enter(&self) -> PendingGuard<'_> {
        self.count.fetch_add(1, Ordering::AcqRel);
        PendingGuard { pending: self }
    }

    /// Wait until no verdict call is in flight, or `timeout` elapses.
    /// Returns `true` when the count reached zero.
    pub async fn wait_idle(&self, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.completed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.get() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.get() == 0;
            }
        }
    }
}

/// Decrements the pending count and pulses waiters on drop, whatever the
/// outcome of the guarded call.
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingVerdicts,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.count.fetch_sub(1, Ordering::AcqRel);
        self.pending.completed.notify_waiters();
    }
}

impl QueueShared {
    /// Deliver `mark` for packet `id` against whatever socket is current
    /// at each attempt.
    ///
    /// Transient failures are retried per the queue's retry policy. A
    /// terminal or exhausted failure counts as an error and raises the
    /// restart signal.
    pub(crate) async fn deliver_verdict(&self, id: u32, mark: Mark) -> Result<(), VerdictError> {
        let _pending = self.pending.enter();

        let result = retry_transient(&self.retry, || {
            self.socket
                .load()
                .set_verdict_with_mark(id, BaseVerdict::Accept, mark)
        })
        .await;

        match result {
            Ok(()) => {
                self.counters.record_mark(mark);
                tracing::trace!(queue_id = self.config.queue_id, id, %mark, "verdict delivered");
                Ok(())
            }
            Err(e) => {
                self.counters.record_error();
                let restart = self.request_restart();
                tracing::warn!(
                    queue_id = self.config.queue_id,
                    id,
                    %mark,
                    error = %e,
                    restart_requested = restart,
                    "verdict failed"
                );
                Err(VerdictError::Kernel { mark, source: e })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use domain::common::entity::{AddressFamily, Direction};
    use domain::queue::entity::QueueConfig;
    use domain::queue::error::QueueError;
    use ports::secondary::queue_socket_port::QueueSocket;
    use ports::test_utils::{NoopMetrics, SpySocket};
    use tokio::sync::mpsc;

    use crate::interception_queue::QueueOptions;
    use crate::retry::RetryPolicy;

    fn shared(
        socket: &Arc<SpySocket>,
    ) -> (Arc<QueueShared>, mpsc::Receiver<crate::packet::Packet>, mpsc::Receiver<()>) {
        let options = QueueOptions {
            retry: RetryPolicy {
                max_attempts: 5,
                delay: Duration::from_millis(1),
            },
            ..QueueOptions::default()
        };
        QueueShared::new(
            QueueConfig::new(17040, AddressFamily::Ipv4, Direction::Outbound),
            Arc::clone(socket) as Arc<dyn QueueSocket>,
            &options,
            Arc::new(NoopMetrics),
        )
    }

    fn terminal() -> QueueError {
        QueueError::Netlink { errno: 9 }
    }

    fn enobufs() -> QueueError {
        QueueError::Netlink { errno: 105 }
    }

    #[test]
    fn counters_record_each_mark() {
        let c = VerdictCounters::default();
        for mark in Mark::ALL {
            c.record_mark(mark);
        }
        c.record_received();
        c.record_error();
        let s = c.snapshot();
        assert_eq!(s.decided(), 6);
        assert_eq!(s.total, 1);
        assert_eq!(s.errors, 1);
        assert_eq!(s.block_always, 1);
    }

    #[tokio::test]
    async fn success_counts_mark_and_uses_accept_base() {
        let socket = SpySocket::new();
        let (shared, _rx, _restart) = shared(&socket);

        shared.deliver_verdict(5, Mark::BlockAlways).await.unwrap();

        assert_eq!(socket.verdicts(), vec![(5, Mark::BlockAlways)]);
        assert_eq!(socket.base_verdicts(), vec![BaseVerdict::Accept]);
        assert_eq!(shared.counters.snapshot().block_always, 1);
        assert_eq!(shared.pending.get(), 0);
    }

    #[tokio::test]
    async fn transient_failure_retried_then_succeeds() {
        let socket = SpySocket::new();
        socket.fail_next(enobufs);
        socket.fail_next(enobufs);
        let (shared, _rx, mut restart) = shared(&socket);

        shared.deliver_verdict(1, Mark::Accept).await.unwrap();

        assert_eq!(socket.call_count(), 3);
        assert_eq!(shared.counters.snapshot().errors, 0);
        assert!(restart.try_recv().is_err());
    }

    #[tokio::test]
    async fn exhausted_retries_count_error_and_restart() {
        let socket = SpySocket::new();
        socket.fail_always(enobufs);
        let (shared, _rx, mut restart) = shared(&socket);

        let err = shared.deliver_verdict(1, Mark::Drop).await.unwrap_err();

        assert!(matches!(err, VerdictError::Kernel { mark: Mark::Drop, .. }));
        assert_eq!(socket.call_count(), 5);
        assert_eq!(shared.counters.snapshot().errors, 1);
        assert!(restart.try_recv().is_ok());
    }

    #[tokio::test]
    async fn terminal_failure_not_retried() {
        let socket = SpySocket::new();
        socket.fail_next(terminal);
        let (shared, _rx, mut restart) = shared(&socket);

        assert!(shared.deliver_verdict(1, Mark::Accept).await.is_err());
        assert_eq!(socket.call_count(), 1);
        assert!(restart.try_recv().is_ok());
        assert_eq!(shared.pending.get(), 0);
    }

    #[tokio::test]
    async fn concurrent_terminal_failures_coalesce_into_one_restart() {
        let socket = SpySocket::new();
        socket.fail_always(terminal);
        let (shared, _rx, mut restart) = shared(&socket);

        let mut tasks = Vec::new();
        for id in 0..10 {
            let shared = Arc::clone(&shared);
            tasks.push(tokio::spawn(async move {
                shared.deliver_verdict(id, Mark::Block).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_err());
        }

        assert_eq!(shared.counters.snapshot().errors, 10);
        assert!(restart.try_recv().is_ok());
        assert!(restart.try_recv().is_err());
    }

    #[tokio::test]
    async fn wait_idle_returns_immediately_when_nothing_pending() {
        let pending = PendingVerdicts::default();
        assert!(pending.wait_idle(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn wait_idle_observes_guard_release() {
        let pending = Arc::new(PendingVerdicts::default());
        let held = Arc::clone(&pending);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _guard = held.enter();
            let _ = rx.await;
        });

        tokio::task::yield_now().await;
        while pending.get() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!pending.wait_idle(Duration::from_millis(20)).await);

        tx.send(()).unwrap();
        assert!(pending.wait_idle(Duration::from_secs(1)).await);
        task.await.unwrap();
    }
}
