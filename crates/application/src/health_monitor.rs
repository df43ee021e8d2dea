use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use domain::queue::entity::SocketState;
use ports::secondary::metrics_port::MetricsPort;
use tokio_util::sync::CancellationToken;

use crate::interception_queue::InterceptionQueue;

/// Default error growth that forces a socket restart.
pub const DEFAULT_ERROR_THRESHOLD: u64 = 1000;

struct Watched {
    queue: Arc<InterceptionQueue>,
    /// Error count at process start or at the last forced restart.
    baseline: AtomicU64,
}

/// Periodic watchdog over every queue's error counter.
///
/// When a queue's errors grew by more than `threshold` since its baseline,
/// a restart is requested and the baseline moves up to the current count.
/// Every check also publishes the queue's counters and liveness.
pub struct HealthMonitor {
    watched: Vec<Watched>,
    threshold: u64,
    interval: Duration,
    metrics: Arc<dyn MetricsPort>,
}

impl HealthMonitor {
    pub fn new(
        queues: &[Arc<InterceptionQueue>],
        threshold: u64,
        interval: Duration,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        let watched = queues
            .iter()
            .map(|queue| Watched {
                baseline: AtomicU64::new(queue.stats().errors),
                queue: Arc::clone(queue),
            })
            .collect();
        Self {
            watched,
            threshold,
            interval,
            metrics,
        }
    }

    /// Run one pass. Returns how many restarts were requested.
    pub fn check(&self) -> usize {
        let mut restarts = 0;

        for w in &self.watched {
            let label = w.queue.label();
            let stats = w.queue.stats();
            self.metrics.set_queue_stats(&label, &stats);
            self.metrics
                .set_queue_live(&label, w.queue.state() == SocketState::Live);

            let baseline = w.baseline.load(Ordering::Relaxed);
            let growth = stats.errors.saturating_sub(baseline);
            if growth <= self.threshold {
                continue;
            }

            w.baseline.store(stats.errors, Ordering::Relaxed);
            let requested = w.queue.request_restart();
            if requested {
                restarts += 1;
            }
            tracing::warn!(
                queue_id = w.queue.id(),
                errors = stats.errors,
                growth,
                threshold = self.threshold,
                restart_requested = requested,
                "queue error threshold exceeded, forcing restart"
            );
        }

        restarts
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.check();
                }
            }
        }

        tracing::debug!("health monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use domain::common::entity::{AddressFamily, Direction};
    use domain::queue::entity::{QueueConfig, QueueStats};
    use ports::secondary::metrics_port::{DecisionMetrics, EventMetrics, QueueMetrics};
    use ports::secondary::queue_socket_port::QueueSocketFactory;
    use ports::test_utils::{NoopMetrics, SpyFactory};

    use crate::interception_queue::QueueOptions;

    #[derive(Default)]
    struct RecordingMetrics {
        stats: Mutex<Vec<(String, QueueStats)>>,
        live: Mutex<Vec<(String, bool)>>,
    }

    impl QueueMetrics for RecordingMetrics {
        fn set_queue_stats(&self, queue: &str, stats: &QueueStats) {
            self.stats.lock().unwrap().push((queue.to_string(), *stats));
        }

        fn set_queue_live(&self, queue: &str, live: bool) {
            self.live.lock().unwrap().push((queue.to_string(), live));
        }
    }
    impl DecisionMetrics for RecordingMetrics {}
    impl EventMetrics for RecordingMetrics {}

    fn open(factory: &Arc<SpyFactory>) -> Arc<InterceptionQueue> {
        let options = QueueOptions {
            reopen_backoff: Duration::from_millis(5),
            ..QueueOptions::default()
        };
        InterceptionQueue::open(
            Arc::clone(factory) as Arc<dyn QueueSocketFactory>,
            QueueConfig::new(17040, AddressFamily::Ipv4, Direction::Outbound),
            options,
            Arc::new(NoopMetrics),
            &CancellationToken::new(),
        )
        .unwrap()
    }

    fn malformed(factory: &SpyFactory, n: usize) {
        let socket = factory.latest();
        for _ in 0..n {
            socket.deliver(None, None);
        }
    }

    #[tokio::test]
    async fn below_threshold_does_nothing() {
        let factory = SpyFactory::new();
        let queue = open(&factory);
        let monitor = HealthMonitor::new(
            std::slice::from_ref(&queue),
            10,
            Duration::from_secs(5),
            Arc::new(NoopMetrics),
        );

        malformed(&factory, 10);
        assert_eq!(monitor.check(), 0);
        queue.destroy().await;
    }

    #[tokio::test]
    async fn growth_past_threshold_forces_one_restart() {
        let factory = SpyFactory::new();
        let queue = open(&factory);
        let monitor = HealthMonitor::new(
            std::slice::from_ref(&queue),
            10,
            Duration::from_secs(5),
            Arc::new(NoopMetrics),
        );

        malformed(&factory, 11);
        assert_eq!(monitor.check(), 1);
        // Baseline moved: the same errors do not trigger again.
        assert_eq!(monitor.check(), 0);

        for _ in 0..200 {
            if factory.sockets().len() == 2 && queue.state() == SocketState::Live {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(factory.sockets().len(), 2);
        queue.destroy().await;
    }

    #[tokio::test]
    async fn errors_before_construction_are_baseline() {
        let factory = SpyFactory::new();
        let queue = open(&factory);
        malformed(&factory, 50);

        let monitor = HealthMonitor::new(
            std::slice::from_ref(&queue),
            10,
            Duration::from_secs(5),
            Arc::new(NoopMetrics),
        );
        assert_eq!(monitor.check(), 0);
        queue.destroy().await;
    }

    #[tokio::test]
    async fn check_publishes_stats_and_liveness() {
        let factory = SpyFactory::new();
        let queue = open(&factory);
        let metrics = Arc::new(RecordingMetrics::default());
        let monitor = HealthMonitor::new(
            std::slice::from_ref(&queue),
            DEFAULT_ERROR_THRESHOLD,
            Duration::from_secs(5),
            Arc::clone(&metrics) as Arc<dyn MetricsPort>,
        );

        malformed(&factory, 2);
        monitor.check();

        let stats = metrics.stats.lock().unwrap().clone();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].0, "17040/ipv4/outbound");
        assert_eq!(stats[0].1.errors, 2);
        assert_eq!(
            metrics.live.lock().unwrap().clone(),
            vec![("17040/ipv4/outbound".to_string(), true)]
        );
        queue.destroy().await;
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let factory = SpyFactory::new();
        let queue = open(&factory);
        let monitor = HealthMonitor::new(
            std::slice::from_ref(&queue),
            DEFAULT_ERROR_THRESHOLD,
            Duration::from_millis(5),
            Arc::new(NoopMetrics),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        queue.destroy().await;
    }
}
