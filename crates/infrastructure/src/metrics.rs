use domain::queue::entity::QueueStats;
use ports::secondary::metrics_port::{DecisionMetrics, EventMetrics, QueueMetrics};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ── Label types ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct QueueLabels {
    pub queue: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct QueueOutcomeLabels {
    pub queue: String,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    pub reason: String,
}

// ── Agent metrics registry ──────────────────────────────────────────

/// Prometheus metrics registry for the agent.
///
/// All metric families use interior mutability (atomics), so recording
/// metrics only requires `&self`. Wrap in `Arc` for sharing.
pub struct AgentMetrics {
    registry: Registry,
    /// Queue counter snapshots; `outcome` is a `QueueStats` field name.
    pub queue_packets: Family<QueueOutcomeLabels, Gauge>,
    pub queue_live: Family<QueueLabels, Gauge>,
    pub queue_restarts_total: Family<QueueLabels, Counter>,
    pub decisions_invalidated_total: Counter,
    pub monitor_events_total: Family<KindLabels, Counter>,
    pub monitor_events_dropped_total: Family<ReasonLabels, Counter>,
}

impl AgentMetrics {
    /// Create a new metrics registry with all metrics registered under
    /// the `markwall` prefix.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("markwall");

        let queue_packets = Family::<QueueOutcomeLabels, Gauge>::default();
        registry.register(
            "queue_packets",
            "Packets seen by a queue, by outcome (snapshot of the queue counters)",
            queue_packets.clone(),
        );

        let queue_live = Family::<QueueLabels, Gauge>::default();
        registry.register(
            "queue_live",
            "Whether the queue holds a live kernel socket (1=live, 0=reopening or closed)",
            queue_live.clone(),
        );

        let queue_restarts_total = Family::<QueueLabels, Counter>::default();
        registry.register(
            "queue_restarts",
            "Completed queue socket restarts",
            queue_restarts_total.clone(),
        );

        let decisions_invalidated_total = Counter::default();
        registry.register(
            "decisions_invalidated",
            "Conntrack entries removed by decision invalidation",
            decisions_invalidated_total.clone(),
        );

        let monitor_events_total = Family::<KindLabels, Counter>::default();
        registry.register(
            "monitor_events",
            "Collaborator events handled by the dispatcher",
            monitor_events_total.clone(),
        );

        let monitor_events_dropped_total = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "monitor_events_dropped",
            "Collaborator events dropped before handling",
            monitor_events_dropped_total.clone(),
        );

        Self {
            registry,
            queue_packets,
            queue_live,
            queue_restarts_total,
            decisions_invalidated_total,
            monitor_events_total,
            monitor_events_dropped_total,
        }
    }

    /// Encode all registered metrics to `OpenMetrics` text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "encoding metrics failed");
        }
        buffer
    }

    fn set_outcome(&self, queue: &str, outcome: &str, value: u64) {
        self.queue_packets
            .get_or_create(&QueueOutcomeLabels {
                queue: queue.to_string(),
                outcome: outcome.to_string(),
            })
            .set(i64::try_from(value).unwrap_or(i64::MAX));
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ── Sub-trait implementations ──────────────────────────────────────

impl QueueMetrics for AgentMetrics {
    fn set_queue_stats(&self, queue: &str, stats: &QueueStats) {
        self.set_outcome(queue, "total", stats.total);
        self.set_outcome(queue, "accept", stats.accept);
        self.set_outcome(queue, "block", stats.block);
        self.set_outcome(queue, "drop", stats.drop);
        self.set_outcome(queue, "accept_always", stats.accept_always);
        self.set_outcome(queue, "block_always", stats.block_always);
        self.set_outcome(queue, "drop_always", stats.drop_always);
        self.set_outcome(queue, "errors", stats.errors);
    }

    fn record_queue_restart(&self, queue: &str) {
        self.queue_restarts_total
            .get_or_create(&QueueLabels {
                queue: queue.to_string(),
            })
            .inc();
    }

    fn set_queue_live(&self, queue: &str, live: bool) {
        self.queue_live
            .get_or_create(&QueueLabels {
                queue: queue.to_string(),
            })
            .set(i64::from(live));
    }
}

impl DecisionMetrics for AgentMetrics {
    fn record_decisions_invalidated(&self, count: u64) {
        self.decisions_invalidated_total.inc_by(count);
    }
}

impl EventMetrics for AgentMetrics {
    fn record_monitor_event(&self, kind: &str) {
        self.monitor_events_total
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    fn record_event_dropped(&self, reason: &str) {
        self.monitor_events_dropped_total
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }
}

// MetricsPort is automatically implemented via the blanket impl
// since AgentMetrics implements all sub-traits.
