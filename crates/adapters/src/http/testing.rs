//! Fixtures shared by the handler tests.

use std::sync::Arc;

use application::interception_queue::{InterceptionQueue, QueueOptions};
use domain::common::entity::{AddressFamily, Direction};
use domain::queue::entity::QueueConfig;
use infrastructure::metrics::AgentMetrics;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::queue_socket_port::QueueSocketFactory;
use ports::test_utils::{NoopMetrics, SpyFactory};
use tokio_util::sync::CancellationToken;

use super::state::AppState;

/// IPv4/TCP header prefix: 10.0.0.1:443 -> 10.0.0.2:51820.
pub const IPV4_TCP: [u8; 24] = [
    0x45, 0, 0, 24, 0, 0, 0, 0, 64, 6, 0, 0, 10, 0, 0, 1, 10, 0, 0, 2, 0x01, 0xbb, 0xca, 0x6c,
];

/// Open one outbound IPv4 queue per id on spy sockets.
pub fn open_queues(factory: &Arc<SpyFactory>, ids: &[u16]) -> Vec<Arc<InterceptionQueue>> {
    let cancel = CancellationToken::new();
    ids.iter()
        .map(|&id| {
            InterceptionQueue::open(
                Arc::clone(factory) as Arc<dyn QueueSocketFactory>,
                QueueConfig::new(id, AddressFamily::Ipv4, Direction::Outbound),
                QueueOptions::default(),
                Arc::new(NoopMetrics) as Arc<dyn MetricsPort>,
                &cancel,
            )
            .unwrap()
        })
        .collect()
}

pub fn app_state(queues: Vec<Arc<InterceptionQueue>>) -> AppState {
    AppState::new(Arc::new(AgentMetrics::new()), queues)
}

pub fn test_state(queues: Vec<Arc<InterceptionQueue>>) -> Arc<AppState> {
    Arc::new(app_state(queues))
}
