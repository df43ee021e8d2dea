use std::sync::Arc;
use std::time::Instant;

use application::decision_cache::DecisionCacheInvalidator;
use application::interception_queue::InterceptionQueue;
use infrastructure::metrics::AgentMetrics;

/// Shared application state for the HTTP server.
///
/// Passed to Axum handlers via `State(Arc<AppState>)`.
pub struct AppState {
    pub metrics: Arc<AgentMetrics>,
    pub queues: Vec<Arc<InterceptionQueue>>,
    /// Absent when conntrack could not be opened.
    pub invalidator: Option<Arc<DecisionCacheInvalidator>>,
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(metrics: Arc<AgentMetrics>, queues: Vec<Arc<InterceptionQueue>>) -> Self {
        Self {
            metrics,
            queues,
            invalidator: None,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Attach the decision-cache invalidator.
    #[must_use]
    pub fn with_invalidator(mut self, invalidator: Arc<DecisionCacheInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    pub fn queue(&self, id: u16) -> Option<&Arc<InterceptionQueue>> {
        self.queues.iter().find(|q| q.id() == id)
    }
}
