use std::time::Duration;

use domain::queue::error::QueueError;

/// Bounded retry for transient kernel-call failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: usize,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(10),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or
/// `policy.max_attempts` is reached. The last error is returned.
///
/// `op` is synchronous: it wraps a single non-blocking kernel call. Only
/// the pause between attempts yields to the runtime.
pub async fn retry_transient<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T, QueueError>
where
    F: FnMut() -> Result<T, QueueError>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::debug!(attempt, error = %e, "transient kernel error, retrying");
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Same contract as [`retry_transient`] for callers outside the runtime,
/// such as a socket reader thread. The pause blocks the calling thread.
pub fn retry_transient_blocking<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T, QueueError>
where
    F: FnMut() -> Result<T, QueueError>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::debug!(attempt, error = %e, "transient kernel error, retrying");
                attempt += 1;
                std::thread::sleep(policy.delay);
            }
            Err(e) => return Err(e),
        }
    }
}
