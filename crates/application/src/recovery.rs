//! Socket recovery: replaces a queue's kernel handle after a fatal error.
//!
//! `Live --restart signal--> Reopening --reopen ok--> Live`. Reopen attempts
//! repeat with a fixed backoff until one succeeds or the queue is cancelled.

use std::sync::Arc;
use std::time::Duration;

use domain::queue::entity::SocketState;
use ports::secondary::queue_socket_port::QueueSocketFactory;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::interception_queue::QueueShared;

pub(crate) async fn run(
    shared: Arc<QueueShared>,
    factory: Arc<dyn QueueSocketFactory>,
    mut restart_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
    backoff: Duration,
) {
    let queue_id = shared.config.queue_id;
    let mut restarts: u64 = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            signal = restart_rx.recv() => {
                if signal.is_none() {
                    break;
                }
            }
        }

        tracing::warn!(queue_id, "restarting queue socket");
        shared.set_state(SocketState::Reopening);
        shared.teardown_socket();
        tokio::task::yield_now().await;

        if !reopen(&shared, factory.as_ref(), &cancel, backoff).await {
            break;
        }

        // Signals raised while reopening were about the old socket.
        while restart_rx.try_recv().is_ok() {}

        shared.set_state(SocketState::Live);
        restarts += 1;
        shared.metrics.record_queue_restart(&shared.config.label());
        tracing::info!(queue_id, restarts, "queue socket restored");
    }

    tracing::debug!(queue_id, restarts, "recovery loop stopped");
}

/// Open a replacement socket, swap it in and attach the packet callback,
/// retrying until success or cancellation. Returns `false` on cancellation.
///
/// The swap precedes `attach`: the new reader may deliver packets before
/// `register` returns, and any verdict they trigger must reach the new
/// socket.
async fn reopen(
    shared: &Arc<QueueShared>,
    factory: &dyn QueueSocketFactory,
    cancel: &CancellationToken,
    backoff: Duration,
) -> bool {
    let queue_id = shared.config.queue_id;
    let mut attempt: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return false;
        }
        attempt += 1;

        match factory.open(&shared.config) {
            Ok(socket) => {
                shared.socket.store(Arc::new(Arc::clone(&socket)));
                match shared.attach(&socket, cancel) {
                    Ok(()) => return true,
                    Err(e) => {
                        let _ = socket.close();
                        tracing::warn!(queue_id, attempt, error = %e, "registering reopened socket failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(queue_id, attempt, error = %e, "reopening queue socket failed");
            }
        }

        tokio::select! {
            () = cancel.cancelled() => return false,
            () = tokio::time::sleep(backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use domain::common::entity::{AddressFamily, Direction};
    use domain::queue::entity::QueueConfig;
    use domain::queue::error::QueueError;
    use domain::verdict::entity::Mark;
    use ports::secondary::queue_socket_port::QueueSocket;
    use ports::test_utils::{NoopMetrics, SpyFactory};

    use crate::interception_queue::{InterceptionQueue, QueueOptions};
    use crate::retry::RetryPolicy;

    fn options() -> QueueOptions {
        QueueOptions {
            channel_capacity: 16,
            retry: RetryPolicy {
                max_attempts: 5,
                delay: Duration::from_millis(1),
            },
            reopen_backoff: Duration::from_millis(5),
            ..QueueOptions::default()
        }
    }

    fn open(factory: &Arc<SpyFactory>, cancel: &CancellationToken) -> Arc<InterceptionQueue> {
        InterceptionQueue::open(
            Arc::clone(factory) as Arc<dyn QueueSocketFactory>,
            QueueConfig::new(17041, AddressFamily::Ipv4, Direction::Inbound),
            options(),
            Arc::new(NoopMetrics),
            cancel,
        )
        .unwrap()
    }

    fn payload() -> Vec<u8> {
        let mut p = vec![0u8; 24];
        p[0] = 0x45;
        p[9] = 17;
        p[12..16].copy_from_slice(&[8, 8, 8, 8]);
        p[16..20].copy_from_slice(&[192, 168, 0, 10]);
        p
    }

    async fn wait_for_sockets(factory: &SpyFactory, queue: &InterceptionQueue, n: usize) {
        for _ in 0..500 {
            if factory.sockets().len() >= n && queue.state() == SocketState::Live {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("socket {n} never went live");
    }

    #[tokio::test]
    async fn restart_signal_swaps_in_new_socket() {
        let factory = SpyFactory::new();
        let cancel = CancellationToken::new();
        let queue = open(&factory, &cancel);
        let old = factory.latest();

        assert!(queue.request_restart());
        wait_for_sockets(&factory, &queue, 2).await;

        let new = factory.latest();
        assert!(old.is_closed());
        assert!(old.reader_token().unwrap().is_cancelled());
        assert!(new.is_registered());
        assert!(!new.is_closed());
        queue.destroy().await;
    }

    #[tokio::test]
    async fn packets_from_old_socket_verdict_through_new_one() {
        let factory = SpyFactory::new();
        let cancel = CancellationToken::new();
        let queue = open(&factory, &cancel);
        let mut rx = queue.packet_channel().unwrap();
        let old = factory.latest();

        for id in 1..=3 {
            old.deliver(Some(id), Some(&payload()));
        }
        old.deliver(Some(99), Some(&[0u8; 4]));
        let before: Vec<_> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .into();

        queue.request_restart();
        wait_for_sockets(&factory, &queue, 2).await;
        let new = factory.latest();

        for pkt in &before {
            assert_eq!(pkt.accept().await.unwrap(), Mark::Accept);
        }

        assert_eq!(old.verdicts(), vec![]);
        assert_eq!(new.verdicts().len(), 3);
        let stats = queue.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.decided(), stats.total);
        assert_eq!(stats.errors, 1);
        queue.destroy().await;
    }

    #[tokio::test]
    async fn overflow_during_register_reaches_replacement_socket() {
        let factory = SpyFactory::new();
        let cancel = CancellationToken::new();
        let queue = InterceptionQueue::open(
            Arc::clone(&factory) as Arc<dyn QueueSocketFactory>,
            QueueConfig::new(17041, AddressFamily::Ipv4, Direction::Inbound),
            QueueOptions {
                channel_capacity: 1,
                ..options()
            },
            Arc::new(NoopMetrics),
            &cancel,
        )
        .unwrap();
        let _rx = queue.packet_channel().unwrap();
        let old = factory.latest();
        old.deliver(Some(1), Some(&payload()));

        factory.deliver_on_next_register(500, &payload());
        queue.request_restart();
        wait_for_sockets(&factory, &queue, 2).await;
        let new = factory.latest();

        assert_eq!(old.verdicts(), vec![]);
        assert_eq!(new.verdicts(), vec![(500, Mark::Accept)]);
        let stats = queue.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.accept, 1);
        assert_eq!(stats.errors, 1);
        queue.destroy().await;
    }

    #[tokio::test]
    async fn reopen_retries_until_factory_recovers() {
        let factory = SpyFactory::new();
        let cancel = CancellationToken::new();
        let queue = open(&factory, &cancel);

        factory.fail_next_opens(3);
        queue.request_restart();
        wait_for_sockets(&factory, &queue, 2).await;

        // 1 initial + 3 failures + 1 success
        assert_eq!(factory.open_count(), 5);
        queue.destroy().await;
    }

    #[tokio::test]
    async fn cancellation_stops_reopening() {
        let factory = SpyFactory::new();
        let cancel = CancellationToken::new();
        let queue = open(&factory, &cancel);

        factory.fail_next_opens(usize::MAX);
        queue.request_restart();
        for _ in 0..200 {
            if queue.state() == SocketState::Reopening && factory.open_count() > 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        cancel.cancel();
        queue.destroy().await;

        let opens = factory.open_count();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(factory.open_count(), opens);
        assert_eq!(queue.state(), SocketState::Closed);
    }

    #[tokio::test]
    async fn terminal_verdict_failure_triggers_recovery() {
        let factory = SpyFactory::new();
        let cancel = CancellationToken::new();
        let queue = open(&factory, &cancel);
        let mut rx = queue.packet_channel().unwrap();
        let old = factory.latest();
        old.fail_always(|| QueueError::Netlink { errno: 9 });

        old.deliver(Some(5), Some(&payload()));
        let pkt = rx.recv().await.unwrap();
        assert!(pkt.block().await.is_err());

        wait_for_sockets(&factory, &queue, 2).await;
        assert!(old.is_closed());
        queue.destroy().await;
    }

    #[tokio::test]
    async fn verdict_racing_a_swap_is_counted_either_way() {
        let factory = SpyFactory::new();
        let cancel = CancellationToken::new();
        let queue = open(&factory, &cancel);
        factory.latest().close().unwrap();

        queue.request_restart();
        let result = queue.shared().deliver_verdict(7, Mark::Accept).await;

        let stats = queue.stats();
        match result {
            Ok(()) => {
                assert_eq!(stats.accept, 1);
                assert_eq!(factory.latest().verdicts(), vec![(7, Mark::Accept)]);
            }
            Err(_) => assert_eq!(stats.errors, 1),
        }
        queue.destroy().await;
    }
}
