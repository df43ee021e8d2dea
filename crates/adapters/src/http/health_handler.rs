use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use domain::queue::entity::SocketState;
use serde::Serialize;

use super::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    /// `"ready"` or `"not_ready"`.
    pub status: &'static str,
    pub queues_live: usize,
    pub queues_total: usize,
}

/// Liveness probe: always 200 while the process runs.
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Readiness probe: 200 when every queue holds a live socket, 503 while
/// any of them is reopening or closed.
pub async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let queues_total = state.queues.len();
    let queues_live = state
        .queues
        .iter()
        .filter(|q| q.state() == SocketState::Live)
        .count();
    let ready = queues_total > 0 && queues_live == queues_total;
    let (code, status) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };
    (
        code,
        Json(ReadyResponse {
            status,
            queues_live,
            queues_total,
        }),
    )
}
