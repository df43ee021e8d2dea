use std::time::Duration;

// ── Network defaults ───────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/markwall/config.yaml";
pub const DEFAULT_HTTP_PORT: u16 = 8080;

// ── Timeouts ───────────────────────────────────────────────────────

pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on waiting for in-flight verdict calls at shutdown.
pub const PENDING_VERDICT_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_timeouts_are_reasonable() {
        assert!(GRACEFUL_SHUTDOWN_TIMEOUT.as_secs() >= 1);
        assert!(GRACEFUL_SHUTDOWN_TIMEOUT.as_secs() <= 30);
        assert!(PENDING_VERDICT_TIMEOUT <= GRACEFUL_SHUTDOWN_TIMEOUT);
    }
}
