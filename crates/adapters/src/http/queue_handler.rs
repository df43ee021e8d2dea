use std::sync::Arc;

use application::interception_queue::InterceptionQueue;
use axum::Json;
use axum::extract::{Path, State};
use domain::common::entity::{AddressFamily, Direction};
use domain::queue::entity::QueueStats;
use serde::Serialize;

use super::error::ApiError;
use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub id: u16,
    pub family: AddressFamily,
    pub direction: Direction,
    /// `live`, `reopening` or `closed`.
    pub state: &'static str,
    pub pending_verdicts: usize,
    pub stats: QueueStats,
}

impl From<&InterceptionQueue> for QueueResponse {
    fn from(q: &InterceptionQueue) -> Self {
        let config = q.config();
        Self {
            id: q.id(),
            family: config.family,
            direction: config.direction,
            state: q.state().as_str(),
            pending_verdicts: q.pending_verdicts(),
            stats: q.stats(),
        }
    }
}

/// Counters and socket state of every queue.
pub async fn list_queues(State(state): State<Arc<AppState>>) -> Json<Vec<QueueResponse>> {
    Json(
        state
            .queues
            .iter()
            .map(|q| QueueResponse::from(q.as_ref()))
            .collect(),
    )
}

pub async fn get_queue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u16>,
) -> Result<Json<QueueResponse>, ApiError> {
    state
        .queue(id)
        .map(|q| Json(QueueResponse::from(q.as_ref())))
        .ok_or_else(|| ApiError::NotFound {
            code: "QUEUE_NOT_FOUND",
            message: format!("queue {id} not found"),
        })
}
