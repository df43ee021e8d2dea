use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use domain::queue::entity::SocketState;
use serde::Serialize;

use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct AgentStatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub queues: usize,
    pub queues_live: usize,
    pub decision_invalidation: bool,
}

/// Returns the current agent status including version, uptime, and queue state.
pub async fn agent_status(State(state): State<Arc<AppState>>) -> Json<AgentStatusResponse> {
    Json(AgentStatusResponse {
        version: state.version.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        queues: state.queues.len(),
        queues_live: state
            .queues
            .iter()
            .filter(|q| q.state() == SocketState::Live)
            .count(),
        decision_invalidation: state.invalidator.is_some(),
    })
}
