use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnTrackError {
    #[error("conntrack socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("conntrack request failed: errno {errno}")]
    Netlink { errno: i32 },

    #[error("malformed conntrack reply: {0}")]
    Malformed(String),

    #[error("flow not tracked")]
    NotFound,

    #[error("source and destination belong to different address families")]
    FamilyMismatch,
}

impl ConnTrackError {
    /// Kernel error codes mapped to typed variants.
    pub fn from_errno(errno: i32) -> Self {
        // ENOENT
        if errno == 2 {
            Self::NotFound
        } else {
            Self::Netlink { errno }
        }
    }
}
