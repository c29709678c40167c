use chrono::{DateTime, Utc};
use colored::Colorize;

use crate::sync::{
    DownloadReport, EntryOutcome, EntryStatus, PassSummary, QueueEntry, StatusReport,
};

fn age(at: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(at);
    if age.num_days() > 0 {
        format!("{} days ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{} hours ago", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{} minutes ago", age.num_minutes())
    } else {
        "just now".to_string()
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

/// Format the status query as pretty output
pub fn format_status_pretty(status: &StatusReport) -> String {
    let mut lines = Vec::new();

    lines.push("Sync Status".bold().to_string());
    lines.push("─".repeat(40));

    let connectivity = if status.is_online {
        "online".green()
    } else {
        "offline".yellow()
    };
    lines.push(format!("  Remote:     {connectivity}"));

    let last_sync = status
        .last_sync_at
        .map_or_else(|| "never".to_string(), age);
    lines.push(format!("  Last sync:  {}", last_sync.dimmed()));

    if status.sync_in_progress {
        lines.push(format!("  Pass:       {}", "running".cyan()));
    }

    lines.push(format!(
        "  Pending:    {} {}",
        status.pending_sync_count,
        if status.pending_sync_count > 0 {
            "entries waiting".dimmed()
        } else {
            "".dimmed()
        }
    ));
    lines.push(format!(
        "  Completed:  {} {}",
        status.queue.completed,
        "entries".dimmed()
    ));
    lines.push(format!(
        "  Failed:     {} {}",
        status.queue.failed,
        if status.queue.failed > 0 {
            "entries need attention".red()
        } else {
            "".normal()
        }
    ));

    if let Some(oldest) = status.queue.oldest_pending {
        lines.push(format!("  Oldest:     {}", age(oldest).dimmed()));
    }

    if let Some(error) = &status.last_error {
        lines.push(format!("  Last error: {}", truncate(error, 60).red()));
    }

    if status.queue.failed > 0 {
        lines.push(String::new());
        lines.push(
            "Run 'erp-sync queue retry --all' to retry failed entries"
                .dimmed()
                .to_string(),
        );
    }

    lines.join("\n")
}

/// Format a finished pass as pretty output
pub fn format_pass_pretty(summary: &PassSummary) -> String {
    let report = &summary.report;
    if report.total() == 0 && summary.download.is_none() {
        return "No pending entries to sync.".to_string();
    }

    let mut lines = Vec::new();
    lines.push(format!(
        "Sync pass: {} completed, {} retrying, {} failed, {} deferred",
        report.completed.to_string().green(),
        report.retried.to_string().yellow(),
        report.failed.to_string().red(),
        report.deferred
    ));

    for result in &report.results {
        let (icon, note) = match &result.outcome {
            EntryOutcome::Completed { remote_id: Some(id) } => {
                ("✓".green(), format!("→ {id}"))
            },
            EntryOutcome::Completed { remote_id: None } => ("✓".green(), String::new()),
            EntryOutcome::Retrying => ("↻".yellow(), String::new()),
            EntryOutcome::Failed => ("✗".red(), String::new()),
            EntryOutcome::Deferred => ("…".dimmed(), "waiting on insert".to_string()),
        };
        lines.push(format!(
            "  {icon} #{:<5} {:<7} {}/{} {}",
            result.entry_id,
            result.operation.as_str(),
            result.table,
            result.record_id,
            note.dimmed()
        ));
        if let Some(error) = &result.error {
            lines.push(format!("           {}", truncate(error, 60).red()));
        }
    }

    if report.connectivity_lost {
        lines.push(
            "Remote unreachable; remaining entries stay pending."
                .yellow()
                .to_string(),
        );
    }

    if let Some(download) = &summary.download {
        lines.push(format_download_pretty(download));
    }

    lines.join("\n")
}

/// Format a reference refresh as pretty output
pub fn format_download_pretty(report: &DownloadReport) -> String {
    let mut lines = vec!["Reference data".bold().to_string()];

    for table in &report.tables {
        lines.push(format!(
            "  {:<12} {} fetched, {} updated, {} kept local",
            table.table, table.fetched, table.upserted, table.skipped
        ));
    }
    for failure in &report.failures {
        lines.push(format!(
            "  {:<12} {}",
            failure.table,
            truncate(&failure.error, 60).red()
        ));
    }

    lines.join("\n")
}

/// Format queue entries as a pretty table
pub fn format_entries_pretty(entries: &[QueueEntry], title: &str) -> String {
    if entries.is_empty() {
        return format!("No {title} entries in queue.");
    }

    let mut lines = Vec::new();
    lines.push(format!("{} Entries ({})", title.to_uppercase(), entries.len()));
    lines.push("─".repeat(72));
    lines.push(format!(
        "{:<6} {:<8} {:<12} {:<24} {:<5} {}",
        "ID", "Op", "Table", "Record", "Try", "Status"
    ));
    lines.push("─".repeat(72));

    for entry in entries {
        let status = match entry.status {
            EntryStatus::Pending => "pending".normal(),
            EntryStatus::Processing => "processing".cyan(),
            EntryStatus::Completed => "completed".green(),
            EntryStatus::Failed => "failed".red(),
        };
        lines.push(format!(
            "{:<6} {:<8} {:<12} {:<24} {:<5} {}",
            entry.id,
            entry.operation.as_str(),
            entry.table_name,
            truncate(&entry.record_id, 24),
            format!("{}/{}", entry.retry_count, entry.max_retries),
            status
        ));

        if let Some(error) = &entry.last_error {
            lines.push(format!("       {}", truncate(error, 60).red()));
        }
    }

    lines.join("\n")
}

/// Format a newly queued entry
pub fn format_queued_pretty(entry: &QueueEntry) -> String {
    format!(
        "Queued {} of {}/{} (entry {}, priority {})",
        entry.operation, entry.table_name, entry.record_id, entry.id, entry.priority
    )
}
