pub mod agent_handler;
pub mod decision_handler;
pub mod error;
pub mod health_handler;
pub mod metrics_handler;
pub mod queue_handler;
pub mod router;
pub mod server;
pub mod state;

#[cfg(test)]
mod testing;
