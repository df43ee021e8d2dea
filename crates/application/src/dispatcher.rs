use std::sync::Arc;
use std::time::{Duration, Instant};

use domain::event::entity::MonitorEvent;
use ports::primary::verdict_policy::VerdictPolicy;
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::connection_cache::{DEFAULT_EVICTION_INTERVAL, RecentConnectionCache};
use crate::interception_queue::InterceptionQueue;
use crate::packet::Packet;

/// Routes intercepted packets to the verdict policy and collaborator
/// events to logging and metrics.
///
/// One consumer task per queue channel. Verdict calls run on their own
/// tasks so a receive loop never waits on the kernel. On cancellation the
/// consumers drain what is already buffered, then the dispatcher waits for
/// every spawned verdict before returning.
pub struct PacketDispatcher {
    queues: Vec<Arc<InterceptionQueue>>,
    policy: Arc<dyn VerdictPolicy>,
    connections: Arc<RecentConnectionCache>,
    metrics: Arc<dyn MetricsPort>,
    eviction_interval: Duration,
    verdicts: TaskTracker,
}

impl PacketDispatcher {
    pub fn new(
        queues: Vec<Arc<InterceptionQueue>>,
        policy: Arc<dyn VerdictPolicy>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        Self {
            queues,
            policy,
            connections: Arc::new(RecentConnectionCache::default()),
            metrics,
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
            verdicts: TaskTracker::new(),
        }
    }

    /// Replace the connection cache, e.g. to change its TTL.
    #[must_use]
    pub fn with_connection_cache(mut self, cache: Arc<RecentConnectionCache>) -> Self {
        self.connections = cache;
        self
    }

    #[must_use]
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    /// Main loop. Returns once cancelled and every verdict issued so far
    /// has completed.
    pub async fn run(
        self,
        mut events: Option<mpsc::Receiver<MonitorEvent>>,
        cancel: CancellationToken,
    ) {
        let mut consumers = JoinSet::new();
        for queue in &self.queues {
            let Some(rx) = queue.packet_channel() else {
                tracing::warn!(queue_id = queue.id(), "packet channel already taken, skipping");
                continue;
            };
            consumers.spawn(consume(
                queue.id(),
                rx,
                Arc::clone(&self.policy),
                self.verdicts.clone(),
                cancel.clone(),
            ));
        }
        tracing::info!(
            queues = consumers.len(),
            policy = self.policy.name(),
            events = events.is_some(),
            "packet dispatcher started"
        );

        let mut eviction = tokio::time::interval(self.eviction_interval);
        eviction.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut event_count: u64 = 0;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    if let Some(rx) = events.as_mut() {
                        while let Ok(event) = rx.try_recv() {
                            event_count += 1;
                            self.handle_event(&event);
                        }
                    }
                    break;
                }
                event = next_event(&mut events), if events.is_some() => {
                    match event {
                        Some(event) => {
                            event_count += 1;
                            self.handle_event(&event);
                        }
                        None => {
                            tracing::debug!("monitor event channel closed");
                            events = None;
                        }
                    }
                }
                _ = eviction.tick() => {
                    let evicted = self.connections.evict_expired(Instant::now());
                    if evicted > 0 {
                        tracing::trace!(evicted, "expired connection observations");
                    }
                }
            }
        }

        let mut packet_count: u64 = 0;
        while let Some(result) = consumers.join_next().await {
            match result {
                Ok(n) => packet_count += n,
                Err(e) => tracing::error!(error = %e, "packet consumer panicked"),
            }
        }

        self.verdicts.close();
        self.verdicts.wait().await;

        tracing::info!(
            total_packets = packet_count,
            total_events = event_count,
            "packet dispatcher stopped"
        );
    }

    fn handle_event(&self, event: &MonitorEvent) {
        match event {
            MonitorEvent::Connection(conn) => {
                if self.connections.observe(conn.key(), Instant::now()) {
                    self.metrics.record_event_dropped("duplicate_connection");
                    return;
                }
                tracing::debug!(
                    connection = %conn.key(),
                    pid = conn.pid,
                    direction = %conn.direction,
                    "connection observed"
                );
            }
            MonitorEvent::Bandwidth(sample) => {
                tracing::trace!(rx_bytes = sample.rx_bytes, tx_bytes = sample.tx_bytes, "bandwidth sample");
            }
            MonitorEvent::Exec(exec) => {
                tracing::debug!(
                    pid = exec.pid,
                    uid = exec.uid,
                    comm = %exec.comm,
                    filename = %exec.filename,
                    "process exec"
                );
            }
        }
        self.metrics.record_monitor_event(event.kind());
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<MonitorEvent>>) -> Option<MonitorEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Receive loop for one queue. Returns the number of packets handled.
async fn consume(
    queue_id: u16,
    mut rx: mpsc::Receiver<Packet>,
    policy: Arc<dyn VerdictPolicy>,
    verdicts: TaskTracker,
    cancel: CancellationToken,
) -> u64 {
    let mut count: u64 = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                while let Ok(packet) = rx.try_recv() {
                    count += 1;
                    dispatch(packet, policy.as_ref(), &verdicts);
                }
                break;
            }
            msg = rx.recv() => {
                match msg {
                    Some(packet) => {
                        count += 1;
                        dispatch(packet, policy.as_ref(), &verdicts);
                    }
                    None => break,
                }
            }
        }
    }

    tracing::debug!(queue_id, packets = count, "packet consumer stopped");
    count
}

fn dispatch(packet: Packet, policy: &dyn VerdictPolicy, verdicts: &TaskTracker) {
    let verdict = policy.decide(packet.info());
    verdicts.spawn(async move {
        if let Err(e) = packet.set_verdict(verdict).await {
            tracing::debug!(
                queue_id = packet.queue_id(),
                id = packet.id,
                %verdict,
                error = %e,
                "verdict not applied"
            );
        }
    });
}
