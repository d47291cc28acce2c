//! Task queue settings, read once at start-up.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Execution strategy for enqueued work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDriver {
    /// Run handlers immediately in-process; nothing is persisted.
    #[default]
    Memory,
    /// Persist a job record and let the processor claim it.
    Durable,
}

impl QueueDriver {
    /// Parse a driver name. Unknown values fall back to [`QueueDriver::Memory`].
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some(n) if n.eq_ignore_ascii_case("durable") => QueueDriver::Durable,
            _ => QueueDriver::Memory,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueDriver::Memory => "memory",
            QueueDriver::Durable => "durable",
        }
    }
}

impl std::fmt::Display for QueueDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the durable driver does with a job type that has no registered handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownTypePolicy {
    /// Persist the record; it stays pending until a handler is registered.
    #[default]
    Pending,
    /// Refuse the enqueue call.
    Reject,
}

impl UnknownTypePolicy {
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some(n) if n.eq_ignore_ascii_case("reject") => UnknownTypePolicy::Reject,
            _ => UnknownTypePolicy::Pending,
        }
    }
}

/// Exponential backoff applied to `available_at` after a failed attempt.
///
/// `delay(n) = base * 2^(n-1)`, capped at `max`. Never decreases as `n` grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next attempt, given the number of failed attempts so far.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2_000),
            max: Duration::from_secs(3_600),
        }
    }
}

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Selected execution strategy.
    pub driver: QueueDriver,
    /// Number of concurrent workers (durable) or in-process tasks (memory).
    pub concurrency: u32,
    /// Attempt ceiling shared by every job type.
    pub max_attempts: u32,
    /// Delay curve between attempts.
    pub backoff: BackoffPolicy,
    /// How often the processor looks for claimable work.
    pub poll_interval: Duration,
    /// Age after which a `processing` lock is considered orphaned.
    pub stale_lock_timeout: Duration,
    /// How often the stale-lock sweep runs.
    pub sweep_interval: Duration,
    /// Behaviour for job types without a handler.
    pub unknown_type: UnknownTypePolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            driver: QueueDriver::Memory,
            concurrency: 2,
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            poll_interval: Duration::from_millis(1_000),
            stale_lock_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            unknown_type: UnknownTypePolicy::Pending,
        }
    }
}

impl QueueSettings {
    pub const DRIVER_VAR: &'static str = "QUEUE_DRIVER";
    pub const CONCURRENCY_VAR: &'static str = "TASK_QUEUE_CONCURRENCY";
    pub const MAX_ATTEMPTS_VAR: &'static str = "TASK_QUEUE_MAX_ATTEMPTS";
    pub const BACKOFF_VAR: &'static str = "TASK_QUEUE_BACKOFF_MS";
    pub const MAX_BACKOFF_VAR: &'static str = "TASK_QUEUE_MAX_BACKOFF_MS";
    pub const POLL_INTERVAL_VAR: &'static str = "TASK_QUEUE_POLL_INTERVAL_MS";
    pub const STALE_LOCK_VAR: &'static str = "TASK_QUEUE_STALE_LOCK_TIMEOUT_MS";
    pub const SWEEP_INTERVAL_VAR: &'static str = "TASK_QUEUE_SWEEP_INTERVAL_MS";
    pub const UNKNOWN_TYPE_VAR: &'static str = "TASK_QUEUE_UNKNOWN_TYPE";

    /// Settings for the durable driver with defaults elsewhere.
    pub fn durable() -> Self {
        Self {
            driver: QueueDriver::Durable,
            ..Default::default()
        }
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`. Missing or invalid values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let positive = |key: &str, default: u64| {
            parse_u64(lookup(key))
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };
        let millis = |key: &str, default: Duration| {
            Duration::from_millis(positive(key, default.as_millis() as u64))
        };

        let base = parse_u64(lookup(Self::BACKOFF_VAR))
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff.base);

        Self {
            driver: QueueDriver::from_name(lookup(Self::DRIVER_VAR).as_deref()),
            concurrency: u32::try_from(positive(Self::CONCURRENCY_VAR, defaults.concurrency.into()))
                .unwrap_or(defaults.concurrency),
            max_attempts: u32::try_from(positive(
                Self::MAX_ATTEMPTS_VAR,
                defaults.max_attempts.into(),
            ))
            .unwrap_or(defaults.max_attempts),
            backoff: BackoffPolicy::new(base, millis(Self::MAX_BACKOFF_VAR, defaults.backoff.max)),
            poll_interval: millis(Self::POLL_INTERVAL_VAR, defaults.poll_interval),
            stale_lock_timeout: millis(Self::STALE_LOCK_VAR, defaults.stale_lock_timeout),
            sweep_interval: millis(Self::SWEEP_INTERVAL_VAR, defaults.sweep_interval),
            unknown_type: UnknownTypePolicy::from_name(lookup(Self::UNKNOWN_TYPE_VAR).as_deref()),
        }
    }

    pub fn with_driver(mut self, driver: QueueDriver) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stale_lock_timeout(mut self, timeout: Duration) -> Self {
        self.stale_lock_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_unknown_type(mut self, policy: UnknownTypePolicy) -> Self {
        self.unknown_type = policy;
        self
    }
}

fn parse_u64(raw: Option<String>) -> Option<u64> {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(QueueSettings::from_lookup(|_| None), QueueSettings::default());
    }

    #[test]
    fn driver_falls_back_to_memory() {
        assert_eq!(QueueDriver::from_name(Some("durable")), QueueDriver::Durable);
        assert_eq!(QueueDriver::from_name(Some(" DURABLE ")), QueueDriver::Durable);
        assert_eq!(QueueDriver::from_name(Some("memory")), QueueDriver::Memory);
        assert_eq!(QueueDriver::from_name(Some("mongo")), QueueDriver::Memory);
        assert_eq!(QueueDriver::from_name(None), QueueDriver::Memory);
    }

    #[test]
    fn reads_every_variable() {
        let settings = QueueSettings::from_lookup(lookup_from(&[
            ("QUEUE_DRIVER", "durable"),
            ("TASK_QUEUE_CONCURRENCY", "8"),
            ("TASK_QUEUE_MAX_ATTEMPTS", "5"),
            ("TASK_QUEUE_BACKOFF_MS", "0"),
            ("TASK_QUEUE_MAX_BACKOFF_MS", "10000"),
            ("TASK_QUEUE_POLL_INTERVAL_MS", "250"),
            ("TASK_QUEUE_STALE_LOCK_TIMEOUT_MS", "60000"),
            ("TASK_QUEUE_SWEEP_INTERVAL_MS", "5000"),
            ("TASK_QUEUE_UNKNOWN_TYPE", "reject"),
        ]));

        assert_eq!(settings.driver, QueueDriver::Durable);
        assert_eq!(settings.concurrency, 8);
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.backoff.base, Duration::ZERO);
        assert_eq!(settings.backoff.max, Duration::from_secs(10));
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.stale_lock_timeout, Duration::from_secs(60));
        assert_eq!(settings.sweep_interval, Duration::from_secs(5));
        assert_eq!(settings.unknown_type, UnknownTypePolicy::Reject);
    }

    #[test]
    fn invalid_numbers_keep_defaults() {
        let settings = QueueSettings::from_lookup(lookup_from(&[
            ("TASK_QUEUE_CONCURRENCY", "0"),
            ("TASK_QUEUE_MAX_ATTEMPTS", "-1"),
            ("TASK_QUEUE_BACKOFF_MS", "soon"),
        ]));

        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.backoff.base, Duration::from_millis(2_000));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(30));

        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(5), Duration::from_secs(30));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(30));

        let mut previous = Duration::ZERO;
        for attempts in 0..64 {
            let delay = policy.delay(attempts);
            assert!(delay >= previous);
            previous = delay;
        }
    }
}
