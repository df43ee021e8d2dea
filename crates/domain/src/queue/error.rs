use std::io;

use thiserror::Error;

/// Errors surfaced by a kernel queue binding.
///
/// The verdict engine retries `is_temporary()` / `is_timeout()` errors
/// locally; anything else is terminal and triggers socket recovery.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to open queue {queue_id}: {reason}")]
    Open { queue_id: u16, reason: String },

    #[error("queue socket I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("netlink error {errno}")]
    Netlink { errno: i32 },

    #[error("malformed netlink message: {0}")]
    Malformed(String),

    #[error("queue socket is closed")]
    Closed,
}

impl QueueError {
    /// Momentary contention on the socket, safe to retry immediately.
    ///
    /// A closed socket counts as temporary: it only happens while the
    /// recovery loop swaps in a replacement, and the retry picks that up.
    pub fn is_temporary(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ) || e.raw_os_error() == Some(ENOBUFS),
            Self::Netlink { errno } => *errno == ENOBUFS || *errno == EAGAIN || *errno == EINTR,
            Self::Closed => true,
            Self::Open { .. } | Self::Malformed(_) => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Io(e) => matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock),
            _ => false,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.is_temporary() || self.is_timeout()
    }
}

const EINTR: i32 = 4;
const EAGAIN: i32 = 11;
const ENOBUFS: i32 = 105;
