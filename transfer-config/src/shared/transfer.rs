use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{DestinationConfig, SourceConfig, ValidationError};

/// How buffered rows are written to the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Rows are deduplicated by primary key and merged.
    #[default]
    Replication,
    /// Every change is kept and appended to a `__history` table.
    History,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Replication => "replication",
            Mode::History => "history",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete configuration for the transfer consumer.
///
/// This intentionally does not implement [`Serialize`] since the source
/// configuration may hold credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Write mode for every table.
    #[serde(default)]
    pub mode: Mode,
    /// Interval of the periodic flush sweep, also used as the sweep cooldown.
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,
    /// Row count at which a table is flushed immediately.
    #[serde(default = "default_buffer_rows")]
    pub buffer_rows: usize,
    /// Approximate buffered size, in kilobytes, at which a table is flushed immediately.
    #[serde(default = "default_flush_size_kb")]
    pub flush_size_kb: usize,
    /// Source queue configuration.
    pub source: SourceConfig,
    /// Destination configuration.
    #[serde(default)]
    pub destination: DestinationConfig,
}

impl TransferConfig {
    pub const DEFAULT_FLUSH_INTERVAL_SECONDS: u64 = 10;

    pub const MIN_FLUSH_INTERVAL_SECONDS: u64 = 5;

    pub const MAX_FLUSH_INTERVAL_SECONDS: u64 = 6 * 60 * 60;

    pub const DEFAULT_BUFFER_ROWS: usize = 30_000;

    pub const MIN_BUFFER_ROWS: usize = 5;

    /// 25 MB.
    pub const DEFAULT_FLUSH_SIZE_KB: usize = 25 * 1024;

    /// Returns the flush interval as a [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }

    /// Validates the settings and every configured topic.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(Self::MIN_FLUSH_INTERVAL_SECONDS..=Self::MAX_FLUSH_INTERVAL_SECONDS)
            .contains(&self.flush_interval_seconds)
        {
            return Err(ValidationError::InvalidFieldValue {
                field: "flush_interval_seconds".to_string(),
                constraint: format!(
                    "must be between {} and {}",
                    Self::MIN_FLUSH_INTERVAL_SECONDS,
                    Self::MAX_FLUSH_INTERVAL_SECONDS
                ),
            });
        }

        if self.buffer_rows < Self::MIN_BUFFER_ROWS {
            return Err(ValidationError::InvalidFieldValue {
                field: "buffer_rows".to_string(),
                constraint: format!("must be at least {}", Self::MIN_BUFFER_ROWS),
            });
        }

        if self.flush_size_kb == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "flush_size_kb".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        self.source.validate()
    }
}

impl Config for TransferConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["source.kafka.bootstrap_servers"];
}

fn default_flush_interval_seconds() -> u64 {
    TransferConfig::DEFAULT_FLUSH_INTERVAL_SECONDS
}

fn default_buffer_rows() -> usize {
    TransferConfig::DEFAULT_BUFFER_ROWS
}

fn default_flush_size_kb() -> usize {
    TransferConfig::DEFAULT_FLUSH_SIZE_KB
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::TopicConfig;

    fn config() -> TransferConfig {
        TransferConfig {
            mode: Mode::Replication,
            flush_interval_seconds: TransferConfig::DEFAULT_FLUSH_INTERVAL_SECONDS,
            buffer_rows: TransferConfig::DEFAULT_BUFFER_ROWS,
            flush_size_kb: TransferConfig::DEFAULT_FLUSH_SIZE_KB,
            source: SourceConfig::Memory {
                topic_configs: vec![TopicConfig::new("db", "public", "orders")],
            },
            destination: DestinationConfig::Memory,
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(config().validate(), Ok(()));
    }

    #[test]
    fn flush_interval_must_be_in_range() {
        let mut cfg = config();
        cfg.flush_interval_seconds = 4;
        assert!(matches!(
            cfg.validate(),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "flush_interval_seconds"
        ));

        cfg.flush_interval_seconds = TransferConfig::MAX_FLUSH_INTERVAL_SECONDS + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn buffer_rows_and_flush_size_are_checked() {
        let mut cfg = config();
        cfg.buffer_rows = 1;
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.flush_size_kb = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn mode_deserializes_from_snake_case() {
        let mode: Mode = serde_json::from_str("\"history\"").unwrap();
        assert_eq!(mode, Mode::History);
        assert_eq!(Mode::default(), Mode::Replication);
    }
}
