use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use super::agent_handler::agent_status;
use super::decision_handler::{invalidate_all, invalidate_flow};
use super::health_handler::{healthz, readyz};
use super::metrics_handler::metrics;
use super::queue_handler::{get_queue, list_queues};
use super::state::AppState;

/// Maximum request body size for API endpoints (16 KiB).
const MAX_BODY_SIZE: usize = 16 * 1024;

/// Build the Axum router.
///
/// 1. **Probes**: `/healthz`, `/readyz`
/// 2. **Metrics**: `/metrics`
/// 3. **API**: `/api/v1/*`
pub fn build_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics));

    let api_routes = Router::new()
        .route("/api/v1/agent/status", get(agent_status))
        .route("/api/v1/queues", get(list_queues))
        .route("/api/v1/queues/{id}", get(get_queue))
        .route("/api/v1/decisions/invalidate", post(invalidate_all))
        .route("/api/v1/decisions/invalidate/flow", post(invalidate_flow))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE));

    public_routes.merge(api_routes).with_state(state)
}
