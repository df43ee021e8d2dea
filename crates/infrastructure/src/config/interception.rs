use std::collections::HashSet;
use std::time::Duration;

use domain::common::entity::{AddressFamily, Direction};
use domain::firewall::entity::RuleSet;
use domain::firewall::ruleset::{DEFAULT_CHAIN_PREFIX, validate_prefix};
use domain::queue::entity::{
    DEFAULT_MAX_PACKET_LEN, DEFAULT_MAX_QUEUE_LEN, OverflowVerdict, QueueConfig,
};
use serde::{Deserialize, Serialize};

use super::common::{ConfigError, check_non_zero, default_true, validation};

/// One kernel queue to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueEntry {
    pub id: u16,
    pub family: AddressFamily,
    pub direction: Direction,
}

impl QueueEntry {
    pub const fn new(id: u16, family: AddressFamily, direction: Direction) -> Self {
        Self {
            id,
            family,
            direction,
        }
    }
}

/// Packet interception: which queues to bind and how to size them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterceptionConfig {
    #[serde(default = "default_queues")]
    pub queues: Vec<QueueEntry>,

    /// Buffered packets per queue between the kernel callback and the
    /// consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_max_packet_len")]
    pub max_packet_len: u32,

    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: u32,

    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Verdict for packets arriving while the channel is full.
    #[serde(default)]
    pub overflow_verdict: OverflowVerdict,

    /// Install the chains and jump rules at startup and remove them at
    /// shutdown.
    #[serde(default = "default_true")]
    pub install_rules: bool,

    #[serde(default = "default_chain_prefix")]
    pub chain_prefix: String,
}

impl Default for InterceptionConfig {
    fn default() -> Self {
        Self {
            queues: default_queues(),
            channel_capacity: default_channel_capacity(),
            max_packet_len: default_max_packet_len(),
            max_queue_len: default_max_queue_len(),
            read_timeout_ms: default_timeout_ms(),
            write_timeout_ms: default_timeout_ms(),
            overflow_verdict: OverflowVerdict::default(),
            install_rules: true,
            chain_prefix: default_chain_prefix(),
        }
    }
}

impl InterceptionConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.is_empty() {
            return Err(validation(
                "interception.queues",
                "at least one queue is required",
            ));
        }

        let mut seen = HashSet::new();
        for q in &self.queues {
            if !seen.insert(q.id) {
                return Err(validation(
                    "interception.queues",
                    format!("duplicate queue id {}", q.id),
                ));
            }
        }

        check_non_zero("interception.channel_capacity", self.channel_capacity as u64)?;
        check_non_zero("interception.max_packet_len", u64::from(self.max_packet_len))?;
        check_non_zero("interception.max_queue_len", u64::from(self.max_queue_len))?;
        check_non_zero("interception.read_timeout_ms", self.read_timeout_ms)?;
        check_non_zero("interception.write_timeout_ms", self.write_timeout_ms)?;

        if self.install_rules {
            validate_prefix(&self.chain_prefix)
                .map_err(|e| validation("interception.chain_prefix", e.to_string()))?;
            for family in self.families() {
                self.queue_pair(family)?;
            }
        }

        Ok(())
    }

    /// Kernel queue parameters for every configured queue.
    pub fn queue_configs(&self) -> Vec<QueueConfig> {
        self.queues
            .iter()
            .map(|q| QueueConfig {
                max_packet_len: self.max_packet_len,
                max_queue_len: self.max_queue_len,
                read_timeout: Duration::from_millis(self.read_timeout_ms),
                write_timeout: Duration::from_millis(self.write_timeout_ms),
                ..QueueConfig::new(q.id, q.family, q.direction)
            })
            .collect()
    }

    /// Families with at least one queue, IPv4 first.
    pub fn families(&self) -> Vec<AddressFamily> {
        [AddressFamily::Ipv4, AddressFamily::Ipv6]
            .into_iter()
            .filter(|f| self.queues.iter().any(|q| q.family == *f))
            .collect()
    }

    /// Filter rule sets for every family.
    pub fn rule_sets(&self) -> Result<Vec<RuleSet>, ConfigError> {
        self.families()
            .into_iter()
            .map(|family| {
                let (outbound, inbound) = self.queue_pair(family)?;
                RuleSet::build(family, &self.chain_prefix, outbound, inbound)
                    .map_err(|e| validation("interception.queues", e.to_string()))
            })
            .collect()
    }

    /// `(outbound, inbound)` queue ids for `family`; rule installation
    /// needs exactly one of each.
    fn queue_pair(&self, family: AddressFamily) -> Result<(u16, u16), ConfigError> {
        let pick = |direction: Direction| {
            let ids: Vec<u16> = self
                .queues
                .iter()
                .filter(|q| q.family == family && q.direction == direction)
                .map(|q| q.id)
                .collect();
            match ids.as_slice() {
                [id] => Ok(*id),
                _ => Err(validation(
                    "interception.queues",
                    format!(
                        "rule installation needs exactly one {direction} {family} queue, found {}",
                        ids.len()
                    ),
                )),
            }
        };
        Ok((pick(Direction::Outbound)?, pick(Direction::Inbound)?))
    }
}

fn default_queues() -> Vec<QueueEntry> {
    vec![
        QueueEntry::new(17040, AddressFamily::Ipv4, Direction::Outbound),
        QueueEntry::new(17041, AddressFamily::Ipv4, Direction::Inbound),
        QueueEntry::new(17060, AddressFamily::Ipv6, Direction::Outbound),
        QueueEntry::new(17160, AddressFamily::Ipv6, Direction::Inbound),
    ]
}
fn default_channel_capacity() -> usize {
    1000
}
fn default_max_packet_len() -> u32 {
    DEFAULT_MAX_PACKET_LEN
}
fn default_max_queue_len() -> u32 {
    DEFAULT_MAX_QUEUE_LEN
}
fn default_timeout_ms() -> u64 {
    1000
}
fn default_chain_prefix() -> String {
    DEFAULT_CHAIN_PREFIX.to_string()
}
