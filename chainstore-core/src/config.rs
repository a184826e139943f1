//! Store configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Unknown keys are rejected.

use crate::error::ConfigError;
use crate::kind::TypeTable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for a `ChainStore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Notification coalescer window.
    pub dispatch_window_ms: u64,
    /// Minimum spacing of full-account requests for one key.
    pub hydration_throttle_ms: u64,
    /// Head block age under which the store goes live.
    pub max_head_block_age_secs: u64,
    pub sync_retry_interval_ms: u64,
    /// Stale-head retries before initialization fails.
    pub max_sync_retries: u32,
    /// Number of clock-offset samples kept for the median.
    pub clock_offset_window: usize,
    /// `limit` passed to each history page request.
    pub history_page_size: u32,
    /// Default bulk resolver timeout.
    pub fetch_timeout_ms: u64,
    pub event_channel_capacity: usize,
    /// Chain genesis instant, used to report sync progress.
    pub genesis_time: Option<DateTime<Utc>>,
    pub object_types: TypeTable,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dispatch_window_ms: 40,
            hydration_throttle_ms: 5_000,
            max_head_block_age_secs: 60,
            sync_retry_interval_ms: 1_000,
            max_sync_retries: 10,
            clock_offset_window: 10,
            history_page_size: 100,
            fetch_timeout_ms: 1_900,
            event_channel_capacity: 1_024,
            genesis_time: None,
            object_types: TypeTable::default(),
        }
    }
}

/// Errors from loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

impl StoreConfig {
    pub fn with_dispatch_window(mut self, window: Duration) -> Self {
        self.dispatch_window_ms = duration_ms(window);
        self
    }

    pub fn with_hydration_throttle(mut self, throttle: Duration) -> Self {
        self.hydration_throttle_ms = duration_ms(throttle);
        self
    }

    pub fn with_max_head_block_age(mut self, age: Duration) -> Self {
        self.max_head_block_age_secs = age.as_secs();
        self
    }

    pub fn with_sync_retry_interval(mut self, interval: Duration) -> Self {
        self.sync_retry_interval_ms = duration_ms(interval);
        self
    }

    pub fn with_max_sync_retries(mut self, retries: u32) -> Self {
        self.max_sync_retries = retries;
        self
    }

    pub fn with_clock_offset_window(mut self, samples: usize) -> Self {
        self.clock_offset_window = samples;
        self
    }

    pub fn with_history_page_size(mut self, limit: u32) -> Self {
        self.history_page_size = limit;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_genesis_time(mut self, genesis: DateTime<Utc>) -> Self {
        self.genesis_time = Some(genesis);
        self
    }

    pub fn with_object_types(mut self, table: TypeTable) -> Self {
        self.object_types = table;
        self
    }

    pub fn dispatch_window(&self) -> Duration {
        Duration::from_millis(self.dispatch_window_ms)
    }

    pub fn hydration_throttle(&self) -> Duration {
        Duration::from_millis(self.hydration_throttle_ms)
    }

    pub fn max_head_block_age(&self) -> Duration {
        Duration::from_secs(self.max_head_block_age_secs)
    }

    pub fn sync_retry_interval(&self) -> Duration {
        Duration::from_millis(self.sync_retry_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("dispatch_window_ms", self.dispatch_window_ms),
            ("hydration_throttle_ms", self.hydration_throttle_ms),
            ("max_head_block_age_secs", self.max_head_block_age_secs),
            ("sync_retry_interval_ms", self.sync_retry_interval_ms),
            ("clock_offset_window", self.clock_offset_window as u64),
            ("history_page_size", u64::from(self.history_page_size)),
            ("fetch_timeout_ms", self.fetch_timeout_ms),
            ("event_channel_capacity", self.event_channel_capacity as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be > 0".to_string(),
                });
            }
        }
        if let Some(genesis) = self.genesis_time {
            if genesis > Utc::now() {
                return Err(ConfigError::InvalidValue {
                    field: "genesis_time".to_string(),
                    reason: "must not be in the future".to_string(),
                });
            }
        }
        self.object_types.compile()?;
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigLoadError> {
        let config: StoreConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigLoadError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch_window(), Duration::from_millis(40));
        assert_eq!(config.hydration_throttle(), Duration::from_secs(5));
        assert_eq!(config.fetch_timeout(), Duration::from_millis(1900));
        assert_eq!(config.object_types, TypeTable::decent());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = StoreConfig::from_toml_str("").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_toml_overrides_and_type_table() {
        let config = StoreConfig::from_toml_str(
            r#"
            dispatch_window_ms = 10
            max_sync_retries = 3

            [object_types]
            witness = 6
            proposal = 10
            operation_history = 11
            vesting_balance = 13
            account_balance = 5
            account_statistics = 6
            "#,
        )
        .unwrap();
        assert_eq!(config.dispatch_window_ms, 10);
        assert_eq!(config.max_sync_retries, 3);
        assert_eq!(config.object_types.operation_history, Some(11));
        // Unspecified entries keep the default table's values.
        assert_eq!(config.object_types.asset, Some(3));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = StoreConfig::from_toml_str("dispatch_window = 40").unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse(_)));
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = StoreConfig::default().with_dispatch_window(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "dispatch_window_ms"
        ));
    }

    #[test]
    fn test_duplicate_type_numbers_rejected() {
        let err = StoreConfig::from_toml_str("[object_types]\nasset = 2\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::Invalid(ConfigError::DuplicateTypeNumber { .. })
        ));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "history_page_size = 50").unwrap();
        let config = StoreConfig::from_path(file.path()).unwrap();
        assert_eq!(config.history_page_size, 50);
    }

    #[test]
    fn test_missing_file() {
        let err = StoreConfig::from_path(Path::new("/nonexistent/chainstore.toml")).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Io(_)));
    }
}
