use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::config::MAX_RETENTION_HOURS;

#[derive(Parser)]
#[command(name = "erp-sync")]
#[command(about = "Offline-first sync engine for the ERP desktop shell")]
#[command(long_about = "erp-sync - offline-first ERP synchronization

Keeps a local SQLite store usable without connectivity, queues every local
mutation, and reconciles with the remote ERP authority once it is reachable.

QUICK START:
  erp-sync init                       Create config and local store
  erp-sync status                     Show connectivity and queue state
  erp-sync sync                       Probe the remote and run a pass now
  erp-sync queue list --status failed List failed entries
  erp-sync run                        Run the engine until Ctrl-C

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting

Logging is controlled with RUST_LOG (default: erp_sync=info).")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    #[arg(short, long, value_enum, default_value = "pretty", global = true)]
    pub output: OutputFormat,

    /// Path to the config file (default: ~/.erp-sync/config.yaml)
    #[arg(long, global = true, env = "ERP_SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the local database, overriding the config file
    #[arg(long, global = true, env = "ERP_SYNC_DATABASE")]
    pub database: Option<PathBuf>,

    /// Remote base URL, overriding the config file
    #[arg(long, global = true, env = "ERP_SYNC_BASE_URL")]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Create the config file and migrate the local store
    ///
    /// Writes a default config if none exists, then applies pending schema
    /// migrations. Safe to run repeatedly.
    Init,

    /// Show connectivity, last sync and queue counts
    ///
    /// Reads the stored status; does not probe the remote.
    #[command(alias = "st")]
    Status,

    /// Probe the remote and run a sync pass now
    ///
    /// The pass runs even if the probe fails; entries then record a
    /// connectivity failure and stay pending.
    Sync,

    /// Refresh reference tables from the remote
    Download,

    /// Inspect and manage the sync queue
    #[command(alias = "q")]
    Queue(QueueArgs),

    /// Run the engine in the foreground until Ctrl-C
    ///
    /// Starts the connectivity monitor and the pass scheduler. On Ctrl-C a
    /// pass in flight is allowed to finish.
    Run,
}

#[derive(Args, Clone)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommands,
}

/// Sync queue subcommands.
#[derive(Subcommand, Clone)]
pub enum QueueCommands {
    /// List queue entries in dequeue order
    List {
        /// Filter by status (pending, processing, completed, failed)
        #[arg(long, short = 's')]
        status: Option<String>,

        /// Maximum entries to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Queue a local mutation
    ///
    /// Writes the entity locally and enqueues it in one transaction.
    ///
    /// # Examples
    ///
    ///   erp-sync queue add customers insert --data '{"name": "Ana"}'
    ///   erp-sync queue add products update --id P-7 --data '{"price": 12}'
    ///   erp-sync queue add products delete --id P-7
    Add {
        /// Entity table (customers, products, sales, sale_items)
        table: String,

        /// Operation (insert, update, delete)
        operation: String,

        /// Record identifier; a provisional one is generated for inserts
        #[arg(long)]
        id: Option<String>,

        /// Entity fields as a JSON object
        #[arg(long, default_value = "{}")]
        data: String,

        /// Higher runs first
        #[arg(long, short = 'p', default_value = "0")]
        priority: i32,
    },

    /// Give failed entries one more attempt
    Retry {
        /// Retry all failed entries
        #[arg(long)]
        all: bool,

        /// Entry ID to retry
        id: Option<i64>,
    },

    /// Delete completed entries
    Purge {
        /// Only entries completed more than this many hours ago
        /// (default: sync.completed_retention_hours)
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_RETENTION_HOURS))]
        older_than: Option<i64>,
    },
}
