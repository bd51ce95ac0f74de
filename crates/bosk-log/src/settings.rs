use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LogError, LogResult};
use crate::manifest::StateFormat;

/// Tuning for [`crate::ReplicatedLogDriver`].
///
/// Loadable from TOML; every field is optional there:
///
/// ```toml
/// timescale_ms = 50
/// patience = 2.0
/// max_retries = 5
/// flush_timeout_ms = 30000
/// preferred_format = "bincode"
/// compaction_interval = 1000
/// poll_interval_ms = 500
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogDriverSettings {
    /// Base unit for retry backoff and polling, in milliseconds.
    pub timescale_ms: u64,
    /// Growth factor of the retry backoff.
    pub patience: f64,
    /// Retries after the first attempt before a call gives up.
    pub max_retries: u32,
    /// How long `flush` waits for its barrier, in milliseconds.
    pub flush_timeout_ms: u64,
    /// State format this process writes and upgrades stored state to.
    pub preferred_format: StateFormat,
    /// Applied records between state snapshots. Zero disables compaction.
    pub compaction_interval: u64,
    /// How often the subscription re-reads a backend that gives no change
    /// notifications, such as a file log written by another process.
    pub poll_interval_ms: u64,
}

impl Default for LogDriverSettings {
    fn default() -> Self {
        Self {
            timescale_ms: 50,
            patience: 2.0,
            max_retries: 5,
            flush_timeout_ms: 30_000,
            preferred_format: StateFormat::Json,
            compaction_interval: 0,
            poll_interval_ms: 500,
        }
    }
}

impl LogDriverSettings {
    /// Short timeouts for tests.
    pub fn for_tests() -> Self {
        Self {
            timescale_ms: 2,
            flush_timeout_ms: 5_000,
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> LogResult<Self> {
        toml::from_str(s).map_err(|e| LogError::Codec(e.to_string()))
    }

    pub fn with_format(mut self, format: StateFormat) -> Self {
        self.preferred_format = format;
        self
    }

    pub fn with_compaction_interval(mut self, records: u64) -> Self {
        self.compaction_interval = records;
        self
    }

    pub fn timescale(&self) -> Duration {
        Duration::from_millis(self.timescale_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.patience.max(1.0).powi(attempt.min(16) as i32);
        Duration::from_millis((self.timescale_ms as f64 * factor).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_defaults() {
        let settings = LogDriverSettings::from_toml_str(
            r#"
            max_retries = 2
            preferred_format = "bincode"
            "#,
        )
        .unwrap();
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.preferred_format, StateFormat::Bincode);
        assert_eq!(settings.timescale_ms, LogDriverSettings::default().timescale_ms);
    }

    #[test]
    fn bad_toml_is_a_codec_error() {
        assert!(matches!(
            LogDriverSettings::from_toml_str("max_retries = \"many\""),
            Err(LogError::Codec(_))
        ));
    }

    #[test]
    fn backoff_grows_by_patience() {
        let settings = LogDriverSettings {
            timescale_ms: 10,
            patience: 3.0,
            ..LogDriverSettings::default()
        };
        assert_eq!(settings.backoff(0), Duration::from_millis(10));
        assert_eq!(settings.backoff(2), Duration::from_millis(90));
    }
}
