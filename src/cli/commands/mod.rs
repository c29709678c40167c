//! Command implementations for erp-sync.
//!
//! Each command returns the text to print; `main` only writes it out.

mod queue;

pub use queue::queue;

use std::path::PathBuf;

use crate::cli::args::{Cli, OutputFormat};
use crate::config::{Config, Paths};
use crate::error::SyncError;
use crate::output::{format_download_pretty, format_pass_pretty, format_status_pretty, to_json};
use crate::storage::LocalStore;
use crate::sync::{SyncCommand, SyncResponse, SyncService, Transition};

/// Resolve the config file from `--config` or the default location.
///
/// # Errors
///
/// Returns an error if no path is given and the home directory is unknown.
pub fn config_path(cli: &Cli) -> Result<PathBuf, SyncError> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => Ok(Paths::new()?.config_file),
    }
}

/// Load the config file and apply command-line overrides.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
pub fn load_config(cli: &Cli) -> Result<Config, SyncError> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    if let Some(database) = &cli.database {
        config.storage.database = Some(database.clone());
    }
    if let Some(base_url) = &cli.base_url {
        config.remote.base_url.clone_from(base_url);
    }

    Ok(config)
}

fn unexpected(response: &SyncResponse) -> SyncError {
    SyncError::Parse(format!("unexpected engine response: {response:?}"))
}

/// Execute init command
///
/// Writes a default config if none exists and migrates the store.
///
/// # Errors
///
/// Returns an error if the config cannot be written or the store cannot be
/// migrated.
pub fn init(cli: &Cli, format: OutputFormat) -> Result<String, SyncError> {
    let path = config_path(cli)?;
    let created = !path.exists();
    let config = load_config(cli)?;
    config.validate()?;

    if created {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save_to_path(&path)?;
    }

    let database = config.database_path()?;
    if let Some(parent) = database.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = LocalStore::open(&database, config.sync.max_retries)?;
    let version = store.initialize()?;

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({
            "config": path,
            "config_created": created,
            "database": database,
            "schema_version": version,
        })),
        OutputFormat::Pretty => Ok(format!(
            "{} {}\nDatabase {} (schema v{version})",
            if created { "Created" } else { "Using" },
            path.display(),
            database.display()
        )),
    }
}

/// Execute status command
///
/// # Errors
///
/// Returns an error if the store cannot be opened or read.
pub async fn status(service: &SyncService, format: OutputFormat) -> Result<String, SyncError> {
    match service.handle(SyncCommand::GetStatus).await? {
        SyncResponse::Status(status) => match format {
            OutputFormat::Json => to_json(&status),
            OutputFormat::Pretty => Ok(format_status_pretty(&status)),
        },
        other => Err(unexpected(&other)),
    }
}

/// Execute sync command: probe once, then force a pass.
///
/// # Errors
///
/// Returns an error if the pass hit a local store failure.
pub async fn sync(service: &SyncService, format: OutputFormat) -> Result<String, SyncError> {
    let transition = service.check_connectivity().await?;
    if transition == Transition::Reconnected {
        tracing::debug!("remote reachable again");
    }

    let response = service.handle(SyncCommand::ForceSync).await?;
    match format {
        OutputFormat::Json => to_json(&response),
        OutputFormat::Pretty => match response {
            SyncResponse::Pass(summary) => Ok(format_pass_pretty(&summary)),
            SyncResponse::Coalesced => Ok("A sync pass is already running.".to_string()),
            other => Err(unexpected(&other)),
        },
    }
}

/// Execute download command
///
/// # Errors
///
/// Returns an error if the store cannot be written.
pub async fn download(service: &SyncService, format: OutputFormat) -> Result<String, SyncError> {
    match service.handle(SyncCommand::RefreshReferenceData).await? {
        SyncResponse::Download(report) => match format {
            OutputFormat::Json => to_json(&report),
            OutputFormat::Pretty => Ok(format_download_pretty(&report)),
        },
        other => Err(unexpected(&other)),
    }
}

/// Execute run command: start the engine and wait for Ctrl-C.
///
/// # Errors
///
/// Returns an error if the signal handler cannot be installed.
pub async fn run(service: &SyncService) -> Result<String, SyncError> {
    let handle = service.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    handle.shutdown().await;

    Ok("Sync engine stopped.".to_string())
}
