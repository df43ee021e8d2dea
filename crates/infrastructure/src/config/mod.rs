//! Agent configuration: structs, parsing, and validation.
//!
//! - `common`: shared helpers and `ConfigError`
//! - `interception`, `health`, `policy`: per-section configs

mod common;
mod health;
mod interception;
mod policy;

pub use common::ConfigError;
pub use health::HealthConfig;
pub use interception::{InterceptionConfig, QueueEntry};
pub use policy::PolicyConfig;

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_HTTP_PORT;
use common::{default_true, validation, warn_if_world_readable};

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentInfo,

    #[serde(default)]
    pub interception: InterceptionConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub policy: PolicyConfig,
}

impl AgentConfig {
    /// Load config from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        warn_if_world_readable(path, "config file");
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string. An empty document yields the
    /// defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml_ng::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the config after deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.http_enabled && self.agent.http_port == 0 {
            return Err(validation("agent.http_port", "must not be 0"));
        }
        self.agent.bind_address.parse::<IpAddr>().map_err(|e| {
            validation(
                "agent.bind_address",
                format!("'{}' is not an IP address: {e}", self.agent.bind_address),
            )
        })?;

        self.interception.validate()?;
        self.health.validate()?;
        Ok(())
    }
}

// ── Agent info ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentInfo {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Serve health, metrics and the operator API.
    #[serde(default = "default_true")]
    pub http_enabled: bool,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// IP address for the HTTP server to bind to.
    /// Defaults to `127.0.0.1` (localhost only).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            http_enabled: true,
            http_port: default_http_port(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_log_format() -> LogFormat {
    LogFormat::Json
}
fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ── Log level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(format!(
                "invalid log level '{s}': expected error|warn|info|debug|trace"
            )),
        }
    }
}

// ── Log format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            _ => Err(format!("invalid log format '{s}': expected json|text")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::common::entity::{AddressFamily, Direction};
    use domain::queue::entity::OverflowVerdict;
    use domain::verdict::entity::Verdict;

    // ── Loading ───────────────────────────────────────────────────

    #[test]
    fn empty_document_gives_defaults() {
        let config = AgentConfig::from_yaml("").unwrap();
        assert_eq!(config.agent.log_level, LogLevel::Info);
        assert_eq!(config.agent.log_format, LogFormat::Json);
        assert_eq!(config.agent.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.agent.bind_address, "127.0.0.1");
        assert!(config.agent.http_enabled);
        assert_eq!(config.interception.queues.len(), 4);
        assert_eq!(config.interception.channel_capacity, 1000);
        assert_eq!(config.interception.overflow_verdict, OverflowVerdict::Accept);
        assert!(config.interception.install_rules);
        assert_eq!(config.health.error_threshold, 1000);
        assert_eq!(config.health.interval_secs, 5);
        assert_eq!(config.policy.default_verdict, Verdict::Accept);
    }

    #[test]
    fn load_full_config() {
        let yaml = r"
agent:
  log_level: debug
  log_format: text
  http_port: 9100
  bind_address: 0.0.0.0
interception:
  queues:
    - { id: 100, family: ipv4, direction: outbound }
    - { id: 101, family: ipv4, direction: inbound }
  channel_capacity: 64
  overflow_verdict: drop
  chain_prefix: TESTWALL
health:
  interval_secs: 1
  error_threshold: 10
policy:
  default_verdict: permanent_block
  log_packets: true
";
        let config = AgentConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.agent.log_level, LogLevel::Debug);
        assert_eq!(config.agent.log_format, LogFormat::Text);
        assert_eq!(config.agent.http_port, 9100);
        assert_eq!(
            config.interception.queues,
            vec![
                QueueEntry::new(100, AddressFamily::Ipv4, Direction::Outbound),
                QueueEntry::new(101, AddressFamily::Ipv4, Direction::Inbound),
            ]
        );
        assert_eq!(config.interception.overflow_verdict, OverflowVerdict::Drop);
        assert_eq!(config.interception.families(), vec![AddressFamily::Ipv4]);
        assert_eq!(config.health.interval().as_secs(), 1);
        assert_eq!(config.policy.default_verdict, Verdict::PermanentBlock);
        assert!(config.policy.log_packets);
    }

    #[test]
    fn load_from_file() {
        let dir = std::env::temp_dir().join(format!("markwall-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(&path, "health:\n  error_threshold: 5\n").unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.health.error_threshold, 5);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = AgentConfig::load(Path::new("/nonexistent/markwall.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    // ── Validation ────────────────────────────────────────────────

    #[test]
    fn unknown_top_level_field_rejected() {
        assert!(matches!(
            AgentConfig::from_yaml("firewall: {}\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn unknown_overflow_verdict_rejected() {
        assert!(AgentConfig::from_yaml("interception:\n  overflow_verdict: reject\n").is_err());
    }

    #[test]
    fn bad_bind_address_rejected() {
        let err = AgentConfig::from_yaml("agent:\n  bind_address: localhost\n").unwrap_err();
        assert!(err.to_string().contains("agent.bind_address"));
    }

    #[test]
    fn zero_http_port_allowed_when_disabled() {
        assert!(AgentConfig::from_yaml("agent:\n  http_port: 0\n").is_err());
        assert!(AgentConfig::from_yaml("agent:\n  http_port: 0\n  http_enabled: false\n").is_ok());
    }

    #[test]
    fn zero_health_interval_rejected() {
        assert!(AgentConfig::from_yaml("health:\n  interval_secs: 0\n").is_err());
    }

    #[test]
    fn one_sided_family_needs_rules_disabled() {
        let yaml = r"
interception:
  queues:
    - { id: 1, family: ipv6, direction: inbound }
";
        assert!(AgentConfig::from_yaml(yaml).is_err());
        let yaml = format!("{yaml}  install_rules: false\n");
        assert!(AgentConfig::from_yaml(&yaml).is_ok());
    }

    // ── LogLevel / LogFormat ──────────────────────────────────────

    #[test]
    fn log_level_parse_and_str() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::Info.as_str(), "info");
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
