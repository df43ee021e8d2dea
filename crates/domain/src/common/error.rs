use thiserror::Error;

use crate::conntrack::error::ConnTrackError;
use crate::queue::error::QueueError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("kernel interface error: {0}")]
    Kernel(String),

    #[error("rule installation failed: {0}")]
    RuleInstall(String),

    #[error("engine error: {0}")]
    EngineError(String),
}

impl From<QueueError> for DomainError {
    fn from(err: QueueError) -> Self {
        Self::Kernel(err.to_string())
    }
}

impl From<ConnTrackError> for DomainError {
    fn from(err: ConnTrackError) -> Self {
        Self::Kernel(err.to_string())
    }
}
