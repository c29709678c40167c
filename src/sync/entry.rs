//! Queue entry types.
//!
//! A [`QueueEntry`] is one local mutation waiting to be applied against the
//! remote authority.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// Kind of mutation carried by a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Value stored in the `operation` column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" | "create" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(SyncError::Parse(format!("unknown operation '{other}'"))),
        }
    }
}

/// Lifecycle state of a queue entry.
///
/// `Pending -> Processing -> Completed`, or back to `Pending` on a retryable
/// failure, or `Failed` once retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting to be sent
    Pending,
    /// Claimed by the running pass
    Processing,
    /// Applied by the remote authority
    Completed,
    /// Gave up; needs operator intervention
    Failed,
}

impl EntryStatus {
    /// Value stored in the `status` column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Check if this status is terminal (no automatic action left).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(SyncError::Parse(format!("unknown entry status '{other}'"))),
        }
    }
}

/// A durable record of one pending mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub table_name: String,
    pub operation: Operation,
    /// Local or remote identifier of the affected entity.
    pub record_id: String,
    /// Domain fields sent to the remote (no local bookkeeping).
    pub payload: Value,
    /// Higher runs first.
    pub priority: i32,
    /// Failed attempts so far; never decreases.
    pub retry_count: u32,
    /// Automatic retries allowed after the first attempt.
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Whether another failure would make this entry terminal.
    #[must_use]
    pub const fn is_last_attempt(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Fields needed to enqueue an entry.
#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub table_name: &'a str,
    pub operation: Operation,
    pub record_id: &'a str,
    pub payload: &'a Value,
    pub priority: i32,
    pub max_retries: u32,
}
