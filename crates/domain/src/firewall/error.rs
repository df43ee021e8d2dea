use thiserror::Error;

use crate::common::error::DomainError;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid chain prefix {prefix:?}: {reason}")]
    InvalidPrefix { prefix: String, reason: &'static str },

    #[error("inbound and outbound queues must differ (both {queue_id})")]
    DuplicateQueue { queue_id: u16 },

    #[error("{binary} {args}: {message}")]
    Command {
        binary: &'static str,
        args: String,
        message: String,
    },
}

impl From<RuleError> for DomainError {
    fn from(e: RuleError) -> Self {
        DomainError::RuleInstall(e.to_string())
    }
}
