use thiserror::Error;

/// Reasons an intercepted packet is rejected before it reaches policy logic.
///
/// None of these owe the kernel a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("packet has no kernel identifier")]
    MissingId,

    #[error("packet {id} has no payload")]
    MissingPayload { id: u32 },

    #[error("header too short: {len} bytes, need {min}")]
    TooShort { len: usize, min: usize },

    #[error("unsupported IP version {0}")]
    UnsupportedVersion(u8),
}
