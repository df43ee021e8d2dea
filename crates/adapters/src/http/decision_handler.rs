use std::net::IpAddr;
use std::sync::Arc;

use application::decision_cache::{DecisionCacheInvalidator, InvalidationReport};
use axum::Json;
use axum::extract::State;
use domain::conntrack::entity::{FlowTuple, FlushReport};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct InvalidationResponse {
    pub removed: u64,
    pub flushed: Vec<FlushReport>,
    pub errors: Vec<String>,
}

impl From<InvalidationReport> for InvalidationResponse {
    fn from(r: InvalidationReport) -> Self {
        Self {
            removed: r.removed,
            flushed: r.flushed,
            errors: r.errors,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowRequest {
    pub protocol: u8,
    pub src_ip: IpAddr,
    #[serde(default)]
    pub src_port: u16,
    pub dst_ip: IpAddr,
    #[serde(default)]
    pub dst_port: u16,
}

#[derive(Debug, Serialize)]
pub struct FlowInvalidationResponse {
    /// `false` when the kernel was not tracking the flow.
    pub removed: bool,
}

fn invalidator(state: &AppState) -> Result<Arc<DecisionCacheInvalidator>, ApiError> {
    state
        .invalidator
        .clone()
        .ok_or_else(|| ApiError::ServiceUnavailable {
            message: "connection tracking is not available".to_string(),
        })
}

/// Forget every permanent decision. Conntrack calls block, so they run
/// off the async workers.
pub async fn invalidate_all(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InvalidationResponse>, ApiError> {
    let inv = invalidator(&state)?;
    let report = tokio::task::spawn_blocking(move || inv.invalidate_all())
        .await
        .map_err(|e| ApiError::Internal {
            message: format!("invalidation task failed: {e}"),
        })??;
    tracing::info!(removed = report.removed, "decisions invalidated via API");
    Ok(Json(report.into()))
}

/// Forget the decision for one flow.
pub async fn invalidate_flow(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FlowRequest>,
) -> Result<Json<FlowInvalidationResponse>, ApiError> {
    let inv = invalidator(&state)?;
    let tuple = FlowTuple::new(req.protocol, req.src_ip, req.src_port, req.dst_ip, req.dst_port)
        .map_err(|e| ApiError::BadRequest {
            code: "INVALID_FLOW",
            message: e.to_string(),
        })?;
    let removed = tokio::task::spawn_blocking(move || inv.invalidate_flow(&tuple))
        .await
        .map_err(|e| ApiError::Internal {
            message: format!("invalidation task failed: {e}"),
        })??;
    Ok(Json(FlowInvalidationResponse { removed }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::{app_state, test_state};
    use domain::common::entity::AddressFamily;
    use domain::verdict::entity::Mark;
    use ports::secondary::conntrack_port::ConnTrackPort;
    use ports::secondary::metrics_port::MetricsPort;
    use ports::test_utils::{NoopMetrics, SpyConnTrack};

    fn state_with(conntrack: Arc<SpyConnTrack>) -> Arc<AppState> {
        let inv = DecisionCacheInvalidator::new(
            conntrack as Arc<dyn ConnTrackPort>,
            vec![AddressFamily::Ipv4, AddressFamily::Ipv6],
            Arc::new(NoopMetrics) as Arc<dyn MetricsPort>,
        );
        Arc::new(app_state(Vec::new()).with_invalidator(Arc::new(inv)))
    }

    #[tokio::test]
    async fn invalidate_all_reports_removed_entries() {
        let ct = SpyConnTrack::new();
        ct.insert(AddressFamily::Ipv4, Mark::AcceptAlways, 3);
        ct.insert(AddressFamily::Ipv6, Mark::DropAlways, 2);
        ct.insert(AddressFamily::Ipv4, Mark::Accept, 9);

        let Json(resp) = invalidate_all(State(state_with(ct))).await.unwrap();
        assert_eq!(resp.removed, 5);
        assert_eq!(resp.flushed.len(), 6);
        assert!(resp.errors.is_empty());
    }

    #[tokio::test]
    async fn partial_failure_still_succeeds() {
        let ct = SpyConnTrack::new();
        ct.insert(AddressFamily::Ipv4, Mark::BlockAlways, 1);
        ct.fail_family(AddressFamily::Ipv6);

        let Json(resp) = invalidate_all(State(state_with(ct))).await.unwrap();
        assert_eq!(resp.removed, 1);
        assert_eq!(resp.errors.len(), 3);
    }

    #[tokio::test]
    async fn without_conntrack_is_unavailable() {
        let err = invalidate_all(State(test_state(Vec::new())))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ServiceUnavailable { .. }));
    }

    #[tokio::test]
    async fn flow_invalidation_reaches_conntrack() {
        let ct = SpyConnTrack::new();
        let state = state_with(Arc::clone(&ct));
        let req = FlowRequest {
            protocol: 6,
            src_ip: "10.0.0.1".parse().unwrap(),
            src_port: 40000,
            dst_ip: "10.0.0.2".parse().unwrap(),
            dst_port: 443,
        };

        let Json(resp) = invalidate_flow(State(state), Json(req)).await.unwrap();
        assert!(resp.removed);
        assert_eq!(ct.deleted_flows().len(), 1);
        assert_eq!(ct.deleted_flows()[0].dst_port, 443);
    }

    #[tokio::test]
    async fn mixed_family_flow_is_bad_request() {
        let state = state_with(SpyConnTrack::new());
        let req = FlowRequest {
            protocol: 17,
            src_ip: "10.0.0.1".parse().unwrap(),
            src_port: 0,
            dst_ip: "::1".parse().unwrap(),
            dst_port: 0,
        };
        let err = invalidate_flow(State(state), Json(req)).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { code: "INVALID_FLOW", .. }));
    }
}
