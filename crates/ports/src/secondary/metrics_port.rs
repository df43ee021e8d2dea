// Focused sub-traits for recording Prometheus metrics, grouped by concern.
//
// All methods take `&self` because the underlying implementation uses
// atomic operations (interior mutability via `prometheus-client`).
//
// Default implementations are no-ops, allowing test mocks to implement
// only the sub-traits relevant to the service under test.

use domain::queue::entity::QueueStats;

// ── Interception queue metrics ─────────────────────────────────────

pub trait QueueMetrics: Send + Sync {
    /// Publish a counter snapshot for one queue.
    fn set_queue_stats(&self, _queue: &str, _stats: &QueueStats) {}

    /// Record a completed socket restart.
    fn record_queue_restart(&self, _queue: &str) {}

    /// Set whether the queue currently holds a live socket.
    fn set_queue_live(&self, _queue: &str, _live: bool) {}
}

// ── Decision cache metrics ─────────────────────────────────────────

pub trait DecisionMetrics: Send + Sync {
    /// Record conntrack entries removed by an invalidation.
    fn record_decisions_invalidated(&self, _count: u64) {}
}

// ── Event pipeline metrics ─────────────────────────────────────────

pub trait EventMetrics: Send + Sync {
    /// Record a collaborator event by kind.
    fn record_monitor_event(&self, _kind: &str) {}

    /// Record a dropped event with a reason label.
    fn record_event_dropped(&self, _reason: &str) {}
}

// ── Composite super-trait ──────────────────────────────────────────

/// Unified metrics port composing all sub-traits.
///
/// Services accept `Arc<dyn MetricsPort>` for full access.
pub trait MetricsPort: QueueMetrics + DecisionMetrics + EventMetrics {}

impl<T> MetricsPort for T where T: QueueMetrics + DecisionMetrics + EventMetrics {}
