use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::entity::{AddressFamily, Direction};
use crate::verdict::entity::Mark;

/// Default captured payload per packet: enough for any IP + transport header.
pub const DEFAULT_MAX_PACKET_LEN: u32 = 1600;
/// Default kernel-side backlog of packets awaiting a verdict.
pub const DEFAULT_MAX_QUEUE_LEN: u32 = 0xffff;
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_millis(1000);

/// Parameters for opening one kernel interception handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub queue_id: u16,
    pub family: AddressFamily,
    pub direction: Direction,
    pub max_packet_len: u32,
    pub max_queue_len: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl QueueConfig {
    pub fn new(queue_id: u16, family: AddressFamily, direction: Direction) -> Self {
        Self {
            queue_id,
            family,
            direction,
            max_packet_len: DEFAULT_MAX_PACKET_LEN,
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            read_timeout: DEFAULT_SOCKET_TIMEOUT,
            write_timeout: DEFAULT_SOCKET_TIMEOUT,
        }
    }

    /// Short label used in logs and metric labels, e.g. `17040/ipv4/outbound`.
    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.queue_id, self.family, self.direction)
    }
}

/// Verdict given synchronously to a packet the consumer channel has no
/// room for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowVerdict {
    /// Fail open.
    #[default]
    Accept,
    /// Fail closed.
    Drop,
}

impl OverflowVerdict {
    pub fn mark(self) -> Mark {
        match self {
            Self::Accept => Mark::Accept,
            Self::Drop => Mark::Drop,
        }
    }
}

/// Point-in-time copy of a queue's verdict counters.
///
/// Each field is loaded independently; the snapshot is not a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: u64,
    pub accept: u64,
    pub block: u64,
    pub drop: u64,
    pub accept_always: u64,
    pub block_always: u64,
    pub drop_always: u64,
    pub errors: u64,
}

impl QueueStats {
    /// Sum of all successfully delivered verdicts.
    pub fn decided(&self) -> u64 {
        self.accept
            + self.block
            + self.drop
            + self.accept_always
            + self.block_always
            + self.drop_always
    }
}

/// Lifecycle of a queue's kernel handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketState {
    Live,
    Reopening,
    Closed,
}

impl SocketState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Live,
            1 => Self::Reopening,
            _ => Self::Closed,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Live => 0,
            Self::Reopening => 1,
            Self::Closed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Reopening => "reopening",
            Self::Closed => "closed",
        }
    }
}
