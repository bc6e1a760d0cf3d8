//! Configuration for the sync engine.

use notesync_protocol::SourceId;
use std::collections::BTreeSet;
use std::time::Duration;

/// Options that replicate between peers. Everything else in the option
/// store (watermarks, the replica id, UI state) stays local.
pub const DEFAULT_SYNCED_OPTIONS: [&str; 8] = [
    "username",
    "password_verification_hash",
    "password_verification_salt",
    "password_derived_key_salt",
    "encrypted_data_key",
    "encrypted_data_key_iv",
    "protected_session_timeout",
    "history_snapshot_time_interval",
];

/// Configuration for one replica's sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// This replica's identity, stamped on every locally produced change.
    pub source_id: SourceId,
    /// Option names allowed to replicate.
    pub synced_options: BTreeSet<String>,
    /// Retry configuration for [`crate::SyncEngine::sync_with_retry`].
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with the default option allow-list.
    pub fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            synced_options: DEFAULT_SYNCED_OPTIONS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            retry: RetryConfig::default(),
        }
    }

    /// Replaces the option allow-list.
    pub fn with_synced_options<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.synced_options = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns true if the option replicates.
    pub fn is_synced_option(&self, name: &str) -> bool {
        self.synced_options.contains(name)
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Fraction of the delay added as jitter (0.0 disables it).
    pub jitter: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.25,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter fraction.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped + capped * self.jitter * jitter_sample())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Cheap value in `[0, 1)` derived from the clock.
fn jitter_sample() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new(SourceId::new("replica-a"))
            .with_synced_options(["username", "theme"])
            .with_retry(RetryConfig::no_retry());

        assert_eq!(config.source_id.as_str(), "replica-a");
        assert!(config.is_synced_option("theme"));
        assert!(!config.is_synced_option("last_synced_pull"));
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn default_allow_list_excludes_local_state() {
        let config = SyncConfig::new(SourceId::generate());
        assert!(config.is_synced_option("protected_session_timeout"));
        assert!(!config.is_synced_option("last_synced_push"));
        assert!(!config.is_synced_option("source_id"));
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_jitter(0.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        // 5s cap plus at most 25% jitter
        let delay = config.delay_for_attempt(5);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(6250));
    }
}
