//! Error types for erp-sync.
//!
//! Every fallible operation in the engine returns [`SyncError`]. The
//! executor relies on [`SyncError::is_retryable`] to decide whether a failed
//! queue entry goes back to `pending` or becomes terminally `failed`.

use thiserror::Error;

/// Errors produced by the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Local store failure (schema, transaction, lock).
    #[error("local store error: {0}")]
    Database(String),

    /// The remote authority could not be reached, or the call timed out.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The remote authority answered with a rejection.
    #[error("remote rejected request ({status}): {message}")]
    Remote {
        /// HTTP status returned by the remote.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The remote-assigned identifier already names a local row.
    #[error("remote id {remote_id} for {table}/{local_id} collides with an existing row")]
    RemapConflict {
        table: String,
        local_id: String,
        remote_id: String,
    },

    /// A queue entry or mutation names a table the engine does not sync.
    #[error("no sync handler for table '{0}'")]
    UnknownTable(String),

    /// A referenced entity or queue entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed payload or response.
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether a queue entry that failed with this error may be attempted again.
    ///
    /// Remote rejections are only retryable for statuses that signal a
    /// transient condition or a reconciliation conflict.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Connectivity(_) => true,
            Self::Remote { status, .. } => {
                matches!(*status, 408 | 409 | 425 | 429) || *status >= 500
            },
            Self::Config(_)
            | Self::Database(_)
            | Self::RemapConflict { .. }
            | Self::UnknownTable(_)
            | Self::NotFound(_)
            | Self::Parse(_)
            | Self::Io(_) => false,
        }
    }

    /// Whether this error means the remote authority is unreachable.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// Whether this error is a local store failure, fatal to a running pass.
    #[must_use]
    pub const fn is_local_store(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
