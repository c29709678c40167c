//! Configuration management for erp-sync.
//!
//! This module handles loading configuration from `~/.erp-sync/`.

mod paths;
mod settings;

pub use paths::Paths;
pub use settings::{
    retention_window, Config, RemoteConfig, StorageConfig, SyncConfig, MAX_RETENTION_HOURS,
};
