//! Configuration for a backup run
//!
//! `BackupConfig` holds everything the engine needs besides the store
//! handle: which tables to back up, how long backups are kept, how hard the
//! store may be hit concurrently and how backup names are formatted. It can
//! be deserialized from JSON and is validated before any store call is made.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{BackupError, Result};

/// Default retention window in days
pub const DEFAULT_EXPIRE_DAYS: u32 = 1;

/// Default per-call timeout for store operations
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;

/// How the timestamp part of a backup name is rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupNameStyle {
    /// `YYYYMMDDMMSS`: no hour field, matches names produced by earlier releases
    Compat,
    /// `YYYYMMDDHHMMSS`
    #[default]
    Hourly,
}

impl BackupNameStyle {
    /// chrono format string for the timestamp suffix
    pub fn timestamp_format(&self) -> &'static str {
        match self {
            BackupNameStyle::Compat => "%Y%m%d%M%S",
            BackupNameStyle::Hourly => "%Y%m%d%H%M%S",
        }
    }
}

impl std::str::FromStr for BackupNameStyle {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "compat" => Ok(BackupNameStyle::Compat),
            "hourly" => Ok(BackupNameStyle::Hourly),
            other => Err(BackupError::validation(format!(
                "Unknown backup name style '{other}' (expected 'compat' or 'hourly')"
            ))),
        }
    }
}

/// Configuration structure for a backup run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Regular expression selecting the tables to back up
    pub table_pattern: String,
    /// Backups created strictly before `now - expire_days` are deleted
    pub expire_days: u32,
    /// Upper bound on store calls in flight at once
    pub max_concurrency: usize,
    /// Timeout applied to every individual store call
    pub call_timeout_secs: u64,
    /// Backup name timestamp layout
    pub name_style: BackupNameStyle,
    /// Refuse to run when the table listing stopped early
    pub strict_listing: bool,
    /// AWS region override (defaults to the SDK provider chain)
    pub region: Option<String>,
    /// Endpoint override, e.g. for DynamoDB Local
    pub endpoint_url: Option<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            table_pattern: String::new(),
            expire_days: DEFAULT_EXPIRE_DAYS,
            max_concurrency: default_max_concurrency(),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            name_style: BackupNameStyle::default(),
            strict_listing: false,
            region: None,
            endpoint_url: None,
        }
    }
}

/// Four store calls in flight per core, with a floor of 16
pub fn default_max_concurrency() -> usize {
    num_cpus::get().max(4) * 4
}

impl BackupConfig {
    /// Create a configuration for the given pattern with every other field defaulted
    pub fn with_pattern(pattern: impl Into<String>) -> Self {
        BackupConfig {
            table_pattern: pattern.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: BackupConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Per-call timeout as a `Duration`
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.expire_days == 0 {
            return Err(BackupError::validation(
                "expire_days must be at least 1 so a fresh backup is never expired by its own run",
            ));
        }
        if self.max_concurrency == 0 {
            return Err(BackupError::validation("max_concurrency must be at least 1"));
        }
        if self.call_timeout_secs == 0 {
            return Err(BackupError::validation("call_timeout_secs must be at least 1"));
        }
        if let Some(endpoint) = &self.endpoint_url {
            if endpoint.trim().is_empty() {
                return Err(BackupError::validation("endpoint_url must not be empty"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BackupConfig::default();
        assert_eq!(config.expire_days, 1);
        assert_eq!(config.call_timeout_secs, 60);
        assert_eq!(config.name_style, BackupNameStyle::Hourly);
        assert!(!config.strict_listing);
        assert!(config.max_concurrency >= 16);
        assert!(config.region.is_none());
    }

    #[test]
    fn test_with_pattern() {
        let config = BackupConfig::with_pattern("^orders_");
        assert_eq!(config.table_pattern, "^orders_");
        assert_eq!(config.expire_days, DEFAULT_EXPIRE_DAYS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = BackupConfig::with_pattern(".*");
        config.expire_days = 0;
        assert!(config.validate().is_err());

        let mut config = BackupConfig::with_pattern(".*");
        config.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = BackupConfig::with_pattern(".*");
        config.call_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = BackupConfig::with_pattern(".*");
        config.endpoint_url = Some("  ".to_string());
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("endpoint_url"));
    }

    #[test]
    fn test_name_style_formats() {
        assert_eq!(BackupNameStyle::Compat.timestamp_format(), "%Y%m%d%M%S");
        assert_eq!(BackupNameStyle::Hourly.timestamp_format(), "%Y%m%d%H%M%S");
        assert_eq!(
            "COMPAT".parse::<BackupNameStyle>().unwrap(),
            BackupNameStyle::Compat
        );
        assert!("daily".parse::<BackupNameStyle>().is_err());
    }

    #[test]
    fn test_from_json_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"table_pattern": "^orders_", "expire_days": 7, "name_style": "compat"}}"#
        )
        .unwrap();

        let config = BackupConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.table_pattern, "^orders_");
        assert_eq!(config.expire_days, 7);
        assert_eq!(config.name_style, BackupNameStyle::Compat);
        assert_eq!(config.call_timeout_secs, DEFAULT_CALL_TIMEOUT_SECS);
    }

    #[test]
    fn test_from_json_file_errors() {
        let result = BackupConfig::from_json_file("/nonexistent/dynamo-backups.json");
        assert!(matches!(result, Err(BackupError::Io(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let result = BackupConfig::from_json_file(file.path());
        assert!(matches!(result, Err(BackupError::Json(_))));
    }
}
