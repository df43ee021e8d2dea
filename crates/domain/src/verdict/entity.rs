use serde::{Deserialize, Serialize};

use super::error::VerdictError;

/// Outcome code shared with the kernel-side filter rules.
///
/// Transient marks decide a single packet. Permanent marks are also saved
/// into the flow's conntrack entry, so later packets of the flow are
/// restored to the same mark and never reach userspace again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Mark {
    Accept = 1700,
    Block = 1701,
    Drop = 1702,
    AcceptAlways = 1710,
    BlockAlways = 1711,
    DropAlways = 1712,
}

impl Mark {
    pub const ALL: [Mark; 6] = [
        Mark::Accept,
        Mark::Block,
        Mark::Drop,
        Mark::AcceptAlways,
        Mark::BlockAlways,
        Mark::DropAlways,
    ];

    /// Marks persisted into conntrack by the save-mark rule.
    pub const PERMANENT: [Mark; 3] = [Mark::AcceptAlways, Mark::BlockAlways, Mark::DropAlways];

    pub fn value(self) -> u32 {
        self as u32
    }

    pub fn is_permanent(self) -> bool {
        matches!(self, Self::AcceptAlways | Self::BlockAlways | Self::DropAlways)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Block => "block",
            Self::Drop => "drop",
            Self::AcceptAlways => "accept_always",
            Self::BlockAlways => "block_always",
            Self::DropAlways => "drop_always",
        }
    }
}

impl TryFrom<u32> for Mark {
    type Error = VerdictError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|m| m.value() == value)
            .ok_or(VerdictError::UnknownMark(value))
    }
}

impl std::fmt::Display for Mark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.as_str(), self.value())
    }
}

/// Decision requested by policy logic for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Block,
    Drop,
    PermanentAccept,
    PermanentBlock,
    PermanentDrop,
}

impl Verdict {
    /// Mark before any protocol or destination specific downgrade.
    pub fn nominal_mark(self) -> Mark {
        match self {
            Self::Accept => Mark::Accept,
            Self::Block => Mark::Block,
            Self::Drop => Mark::Drop,
            Self::PermanentAccept => Mark::AcceptAlways,
            Self::PermanentBlock => Mark::BlockAlways,
            Self::PermanentDrop => Mark::DropAlways,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Block => "block",
            Self::Drop => "drop",
            Self::PermanentAccept => "permanent_accept",
            Self::PermanentBlock => "permanent_block",
            Self::PermanentDrop => "permanent_drop",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accept" => Ok(Self::Accept),
            "block" => Ok(Self::Block),
            "drop" => Ok(Self::Drop),
            "permanent_accept" => Ok(Self::PermanentAccept),
            "permanent_block" => Ok(Self::PermanentBlock),
            "permanent_drop" => Ok(Self::PermanentDrop),
            _ => Err(format!(
                "invalid verdict '{s}': expected accept|block|drop|permanent_accept|permanent_block|permanent_drop"
            )),
        }
    }
}

/// Base disposition handed to the kernel together with the mark.
///
/// The queue always reinjects with `Accept`; the actual outcome is applied
/// by the filter rules matching on the mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BaseVerdict {
    Drop = 0,
    Accept = 1,
}

impl BaseVerdict {
    pub fn value(self) -> u32 {
        self as u32
    }
}
