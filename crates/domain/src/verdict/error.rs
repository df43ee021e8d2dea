use thiserror::Error;

use crate::queue::error::QueueError;
use crate::verdict::entity::Mark;

#[derive(Debug, Error)]
pub enum VerdictError {
    #[error("verdict already set")]
    AlreadySet,

    #[error("unknown mark value {0}")]
    UnknownMark(u32),

    #[error("queue {queue_id} is gone")]
    QueueGone { queue_id: u16 },

    #[error("failed to set verdict {mark}: {source}")]
    Kernel {
        mark: Mark,
        #[source]
        source: QueueError,
    },
}
