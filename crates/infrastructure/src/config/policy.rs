use domain::verdict::entity::Verdict;
use serde::{Deserialize, Serialize};

/// Bundled static decision policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    #[serde(default = "default_verdict")]
    pub default_verdict: Verdict,

    /// Log every packet with its verdict at info level.
    #[serde(default)]
    pub log_packets: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_verdict: default_verdict(),
            log_packets: false,
        }
    }
}

fn default_verdict() -> Verdict {
    Verdict::Accept
}
