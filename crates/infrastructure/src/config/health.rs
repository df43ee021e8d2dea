use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::common::{ConfigError, check_non_zero};

/// Queue watchdog: how often to check and how much error growth forces a
/// socket restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_error_threshold")]
    pub error_threshold: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            error_threshold: default_error_threshold(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        check_non_zero("health.interval_secs", self.interval_secs)
    }
}

fn default_interval_secs() -> u64 {
    5
}
fn default_error_threshold() -> u64 {
    1000
}
