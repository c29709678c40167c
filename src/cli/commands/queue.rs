//! Sync queue command implementation.
//!
//! Handles sync queue management commands.

use serde_json::Value;

use crate::cli::args::{OutputFormat, QueueCommands};
use crate::config::retention_window;
use crate::error::SyncError;
use crate::output::{format_entries_pretty, format_queued_pretty, to_json};
use crate::storage::EntityRecord;
use crate::sync::{EntryStatus, Operation, SyncCommand, SyncResponse, SyncService};

/// Execute queue subcommands.
///
/// # Errors
///
/// Returns an error for invalid arguments or store failures.
pub async fn queue(
    service: &SyncService,
    cmd: QueueCommands,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match cmd {
        QueueCommands::List { status, limit } => list_entries(service, status, limit, format).await,
        QueueCommands::Add {
            table,
            operation,
            id,
            data,
            priority,
        } => add_entry(service, table, &operation, id, &data, priority, format).await,
        QueueCommands::Retry { all, id } => retry_entries(service, all, id, format).await,
        QueueCommands::Purge { older_than } => purge_entries(service, older_than, format).await,
    }
}

/// List queue entries.
async fn list_entries(
    service: &SyncService,
    status_filter: Option<String>,
    limit: usize,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let status = status_filter
        .as_deref()
        .map(str::parse::<EntryStatus>)
        .transpose()?;

    let entries = match service
        .handle(SyncCommand::ListEntries { status, limit })
        .await?
    {
        SyncResponse::Entries(entries) => entries,
        other => return Err(SyncError::Parse(format!("unexpected response: {other:?}"))),
    };

    match format {
        OutputFormat::Json => to_json(&entries),
        OutputFormat::Pretty => {
            let title = status.map_or("queued", |s| s.as_str());
            Ok(format_entries_pretty(&entries, title))
        },
    }
}

/// Queue a local mutation.
async fn add_entry(
    service: &SyncService,
    table: String,
    operation: &str,
    id: Option<String>,
    data: &str,
    priority: i32,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let operation: Operation = operation.parse()?;
    let fields = match serde_json::from_str::<Value>(data)? {
        Value::Object(fields) => fields,
        _ => return Err(SyncError::Parse("--data must be a JSON object".to_string())),
    };

    let entity = match (operation, id) {
        (_, Some(id)) => EntityRecord::with_id(table, id, fields),
        (Operation::Insert, None) => EntityRecord::new_local(table, fields),
        (_, None) => {
            return Err(SyncError::Config(format!(
                "--id is required for {operation}"
            )))
        },
    };

    let entry = match service
        .handle(SyncCommand::ApplyLocalMutation {
            entity,
            operation,
            priority,
        })
        .await?
    {
        SyncResponse::Queued(entry) => entry,
        other => return Err(SyncError::Parse(format!("unexpected response: {other:?}"))),
    };

    match format {
        OutputFormat::Json => to_json(&entry),
        OutputFormat::Pretty => Ok(format_queued_pretty(&entry)),
    }
}

/// Retry failed entries.
async fn retry_entries(
    service: &SyncService,
    all: bool,
    id: Option<i64>,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let command = match (all, id) {
        (false, Some(id)) => SyncCommand::RetryFailed { id: Some(id) },
        (true, None) => SyncCommand::RetryFailed { id: None },
        _ => {
            return Err(SyncError::Config(
                "Specify --all or provide an entry ID".to_string(),
            ))
        },
    };

    let count = match service.handle(command).await? {
        SyncResponse::Retried(count) => count,
        other => return Err(SyncError::Parse(format!("unexpected response: {other:?}"))),
    };

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "retried": count })),
        OutputFormat::Pretty => Ok(format!("Requeued {count} failed entries")),
    }
}

/// Purge completed entries.
async fn purge_entries(
    service: &SyncService,
    older_than: Option<i64>,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let hours = older_than.unwrap_or(service.config().sync.completed_retention_hours);
    let older_than = retention_window(hours)?;

    let count = match service.handle(SyncCommand::PurgeCompleted { older_than }).await? {
        SyncResponse::Purged(count) => count,
        other => return Err(SyncError::Parse(format!("unexpected response: {other:?}"))),
    };

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "purged": count })),
        OutputFormat::Pretty => Ok(format!(
            "Purged {count} completed entries older than {hours} hours"
        )),
    }
}
