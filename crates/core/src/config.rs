//! Environment-driven knobs (`KGATE_*`).

use std::time::Duration;

use tracing::warn;

pub const ENV_RETRY_MAX_ATTEMPTS: &str = "KGATE_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_INTERVAL_MS: &str = "KGATE_RETRY_INTERVAL_MS";
pub const ENV_WATCH_NAMESPACE: &str = "KGATE_WATCH_NAMESPACE";
pub const ENV_DISPATCH_POLICY: &str = "KGATE_DISPATCH_POLICY";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Parse an env var, falling back to `default` when unset or unparsable.
pub fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(var = name, value = %raw, "ignoring unparsable env value");
                default
            }
        },
        Err(_) => default,
    }
}

/// Non-empty string env var.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Bounds for the fetch/compute/write retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, interval: DEFAULT_RETRY_INTERVAL }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), interval }
    }

    /// `KGATE_RETRY_MAX_ATTEMPTS` / `KGATE_RETRY_INTERVAL_MS`, defaulting to 5 x 50ms.
    pub fn from_env() -> Self {
        let attempts = env_parse(ENV_RETRY_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS);
        let interval_ms = env_parse(ENV_RETRY_INTERVAL_MS, DEFAULT_RETRY_INTERVAL.as_millis() as u64);
        Self::new(attempts, Duration::from_millis(interval_ms))
    }

    /// Upper bound on the time a retry loop spends sleeping.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}
