//! Configuration settings for erp-sync.
//!
//! Settings are loaded from `~/.erp-sync/config.yaml`. Every field has a
//! default, so a missing file or a partial file is valid.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Paths;
use crate::error::SyncError;
use crate::storage::schema;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Remote authority settings.
    pub remote: RemoteConfig,
    /// Scheduling and retry settings.
    pub sync: SyncConfig,
    /// Local store settings.
    pub storage: StorageConfig,
}

/// Remote authority settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the REST API, e.g. `https://erp.example.com`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Timeout applied to every create/update/delete/fetch call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Timeout applied to connectivity probes.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Path probed for reachability.
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
}

/// Scheduling and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between connectivity probes.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    /// Seconds between periodic sync passes.
    #[serde(default = "default_pass_interval")]
    pub pass_interval_secs: u64,
    /// Automatic retries granted to a queue entry after its first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Entries fetched from the queue per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Tables refreshed by the bulk downloader.
    #[serde(default = "default_reference_tables")]
    pub reference_tables: Vec<String>,
    /// Completed entries older than this are purged after a pass.
    #[serde(default = "default_retention_hours")]
    pub completed_retention_hours: i64,
}

/// Local store settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file; defaults to `~/.erp-sync/erp-sync.db`.
    pub database: Option<PathBuf>,
}

// Default value functions for serde
fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

const fn default_request_timeout() -> u64 {
    15
}

const fn default_probe_timeout() -> u64 {
    5
}

fn default_probe_path() -> String {
    "/api/health".to_string()
}

const fn default_probe_interval() -> u64 {
    30
}

const fn default_pass_interval() -> u64 {
    60
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_batch_size() -> usize {
    50
}

fn default_reference_tables() -> Vec<String> {
    vec!["products".to_string(), "customers".to_string()]
}

const fn default_retention_hours() -> i64 {
    168
}

/// Longest retention accepted for completed queue entries (ten years).
pub const MAX_RETENTION_HOURS: i64 = 24 * 365 * 10;

/// Age window for purging completed entries.
///
/// # Errors
///
/// Returns `SyncError::Config` unless `hours` is in `1..=MAX_RETENTION_HOURS`.
pub fn retention_window(hours: i64) -> Result<chrono::Duration, SyncError> {
    if !(1..=MAX_RETENTION_HOURS).contains(&hours) {
        return Err(SyncError::Config(format!(
            "retention must be between 1 and {MAX_RETENTION_HOURS} hours, got {hours}"
        )));
    }
    chrono::TimeDelta::try_hours(hours)
        .ok_or_else(|| SyncError::Config(format!("retention of {hours} hours is out of range")))
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            probe_path: default_probe_path(),
        }
    }
}

impl RemoteConfig {
    /// Timeout for remote sync calls.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Timeout for connectivity probes.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval(),
            pass_interval_secs: default_pass_interval(),
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            reference_tables: default_reference_tables(),
            completed_retention_hours: default_retention_hours(),
        }
    }
}

impl SyncConfig {
    /// Age after which completed entries are purged.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` for an out-of-range retention.
    pub fn retention(&self) -> Result<chrono::Duration, SyncError> {
        retention_window(self.completed_retention_hours)
    }

    /// Interval between connectivity probes.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Interval between periodic passes.
    #[must_use]
    pub const fn pass_interval(&self) -> Duration {
        Duration::from_secs(self.pass_interval_secs)
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self, SyncError> {
        let paths = Paths::new()?;
        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        serde_yaml::from_str(&contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), SyncError> {
        let contents = serde_yaml::to_string(self)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to write config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Resolve the database path, falling back to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if no explicit path is set and the home directory
    /// cannot be determined.
    pub fn database_path(&self) -> Result<PathBuf, SyncError> {
        match &self.storage.database {
            Some(path) => Ok(path.clone()),
            None => Ok(Paths::new()?.database),
        }
    }

    /// Check the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.remote.base_url.trim().is_empty() {
            return Err(SyncError::Config("remote.base_url must not be empty".to_string()));
        }
        if self.remote.request_timeout_secs == 0 || self.remote.probe_timeout_secs == 0 {
            return Err(SyncError::Config("remote timeouts must be positive".to_string()));
        }
        if self.sync.probe_interval_secs == 0 || self.sync.pass_interval_secs == 0 {
            return Err(SyncError::Config("sync intervals must be positive".to_string()));
        }
        if self.sync.batch_size == 0 {
            return Err(SyncError::Config("sync.batch_size must be positive".to_string()));
        }
        self.sync.retention()?;
        for table in &self.sync.reference_tables {
            if schema::lookup(table).is_none() {
                return Err(SyncError::Config(format!(
                    "sync.reference_tables names unknown table '{table}'"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.sync.probe_interval_secs, 30);
        assert_eq!(config.sync.pass_interval_secs, 60);
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.remote.probe_path, "/api/health");
        assert!(config.storage.database.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let config = Config::load_from_path(&config_path).unwrap();

        assert_eq!(config.sync.max_retries, 5);
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut config = Config::default();
        config.remote.base_url = "https://erp.example.com".to_string();
        config.sync.max_retries = 8;

        config.save_to_path(&config_path).unwrap();

        let loaded = Config::load_from_path(&config_path).unwrap();

        assert_eq!(loaded.remote.base_url, "https://erp.example.com");
        assert_eq!(loaded.sync.max_retries, 8);
    }

    #[test]
    fn test_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let partial_yaml = r"
sync:
  pass_interval_secs: 120
";
        std::fs::write(&config_path, partial_yaml).unwrap();

        let config = Config::load_from_path(&config_path).unwrap();

        assert_eq!(config.sync.pass_interval_secs, 120);
        assert_eq!(config.sync.probe_interval_secs, 30);
        assert_eq!(config.remote.request_timeout_secs, 15);
    }

    #[test]
    fn test_validate_rejects_unknown_reference_table() {
        let mut config = Config::default();
        config.sync.reference_tables.push("payroll".to_string());

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("payroll"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.sync.pass_interval_secs = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_retention() {
        for hours in [i64::MAX, MAX_RETENTION_HOURS + 1, 0, -24] {
            let mut config = Config::default();
            config.sync.completed_retention_hours = hours;

            let err = config.validate().unwrap_err();
            assert!(matches!(err, SyncError::Config(_)), "{hours}: {err}");
        }
    }

    #[test]
    fn test_retention_window_bounds() {
        assert_eq!(retention_window(1).unwrap(), chrono::Duration::hours(1));
        assert_eq!(
            retention_window(MAX_RETENTION_HOURS).unwrap().num_hours(),
            MAX_RETENTION_HOURS
        );
        assert!(retention_window(10_000_000_000).is_err());
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "sync: [not, a, map").unwrap();

        let err = Config::load_from_path(&config_path).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
