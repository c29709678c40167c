//! Sync queue storage and management.
//!
//! [`ChangeQueue`] is the API over the `sync_queue` table. Every status
//! change runs in a store transaction that also refreshes the pending count
//! in `offline_status`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::entry::{EntryStatus, NewEntry, Operation, QueueEntry};
use crate::error::SyncError;
use crate::storage::entities::{self, RemapSummary};
use crate::storage::{format_timestamp, now_timestamp, parse_timestamp, schema, status, LocalStore};

const ENTRY_COLUMNS: &str = "id, table_name, operation, record_id, payload, priority, retry_count,
                             max_retries, last_error, status, created_at, updated_at";

/// Dequeue order: priority descending, then creation time, then insertion.
const DEQUEUE_ORDER: &str = "ORDER BY priority DESC, created_at ASC, id ASC";

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    /// Oldest pending entry timestamp
    pub oldest_pending: Option<DateTime<Utc>>,
}

/// Queue of local mutations awaiting the remote authority.
#[derive(Clone)]
pub struct ChangeQueue {
    store: Arc<LocalStore>,
}

impl ChangeQueue {
    /// Create a queue over an initialized store.
    #[must_use]
    pub const fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Up to `limit` pending entries in dequeue order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn dequeue_batch(&self, limit: usize) -> Result<Vec<QueueEntry>, SyncError> {
        self.store.read(|conn| {
            query_entries(
                conn,
                &format!("WHERE status = 'pending' {DEQUEUE_ORDER} LIMIT ?1"),
                params![i64::try_from(limit).unwrap_or(i64::MAX)],
            )
        })
    }

    /// Entries with a given status (all statuses when `None`).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list(
        &self,
        status_filter: Option<EntryStatus>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, SyncError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.store.read(|conn| match status_filter {
            Some(s) => query_entries(
                conn,
                &format!("WHERE status = ?1 {DEQUEUE_ORDER} LIMIT ?2"),
                params![s.as_str(), limit],
            ),
            None => query_entries(conn, &format!("{DEQUEUE_ORDER} LIMIT ?1"), params![limit]),
        })
    }

    /// Get a specific entry by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, id: i64) -> Result<Option<QueueEntry>, SyncError> {
        self.store.read(|conn| get_entry(conn, id))
    }

    /// Claim a pending entry for the running pass.
    ///
    /// Returns `false` if the entry is no longer pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn begin_processing(&self, id: i64) -> Result<bool, SyncError> {
        self.store.write(|tx| {
            let rows = tx
                .execute(
                    "UPDATE sync_queue SET status = 'processing', updated_at = ?1
                     WHERE id = ?2 AND status = 'pending'",
                    params![now_timestamp(), id],
                )
                .map_err(|e| SyncError::Database(format!("Failed to claim entry {id}: {e}")))?;
            Ok(rows == 1)
        })
    }

    /// Return a claimed entry to pending without counting an attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn release(&self, id: i64) -> Result<(), SyncError> {
        self.store.write(|tx| {
            set_status(tx, id, EntryStatus::Pending)?;
            status::refresh_pending_count(tx)
        })
    }

    /// Mark an entry as completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_completed(&self, id: i64) -> Result<(), SyncError> {
        self.store.write(|tx| {
            set_status(tx, id, EntryStatus::Completed)?;
            status::refresh_pending_count(tx)
        })
    }

    /// Complete an insert and remap the provisional identifier, atomically.
    ///
    /// # Errors
    ///
    /// Returns `RemapConflict` if `remote_id` already names a local row, or a
    /// store error. Nothing is applied on error.
    pub fn complete_insert(
        &self,
        entry: &QueueEntry,
        remote_id: &str,
    ) -> Result<RemapSummary, SyncError> {
        let schema = schema::require(&entry.table_name)?;
        self.store.write(|tx| {
            let summary = entities::remap_identifier(tx, schema, &entry.record_id, remote_id)?;
            if !has_outstanding_for_record(tx, &entry.table_name, remote_id, entry.id)? {
                entities::mark_synced(tx, schema, remote_id)?;
            }
            set_status(tx, entry.id, EntryStatus::Completed)?;
            status::refresh_pending_count(tx)?;
            Ok(summary)
        })
    }

    /// Complete an update. The row is flagged synced only if no later
    /// mutation of the same record is still queued.
    ///
    /// # Errors
    ///
    /// Returns a store error; nothing is applied on error.
    pub fn complete_update(&self, entry: &QueueEntry) -> Result<(), SyncError> {
        let schema = schema::require(&entry.table_name)?;
        self.store.write(|tx| {
            if !has_outstanding_for_record(tx, &entry.table_name, &entry.record_id, entry.id)? {
                entities::mark_synced(tx, schema, &entry.record_id)?;
            }
            set_status(tx, entry.id, EntryStatus::Completed)?;
            status::refresh_pending_count(tx)
        })
    }

    /// Complete a delete and remove the local row.
    ///
    /// # Errors
    ///
    /// Returns a store error; nothing is applied on error.
    pub fn complete_delete(&self, entry: &QueueEntry) -> Result<(), SyncError> {
        let schema = schema::require(&entry.table_name)?;
        self.store.write(|tx| {
            entities::delete_row(tx, schema, &entry.record_id)?;
            set_status(tx, entry.id, EntryStatus::Completed)?;
            status::refresh_pending_count(tx)
        })
    }

    /// Record a failed attempt and apply the retry policy.
    ///
    /// `retry_count` is incremented. The entry goes back to `Pending` when
    /// the error is retryable and `retry_count <= max_retries`; otherwise it
    /// becomes `Failed`. Returns the new status.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown entry, or a store error.
    pub fn mark_failed(&self, id: i64, error: &SyncError) -> Result<EntryStatus, SyncError> {
        let message = error.to_string();
        let retryable = error.is_retryable();

        self.store.write(|tx| {
            let (retry_count, max_retries): (u32, u32) = tx
                .query_row(
                    "SELECT retry_count, max_retries FROM sync_queue WHERE id = ?1",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| SyncError::Database(format!("Failed to load entry {id}: {e}")))?
                .ok_or_else(|| SyncError::NotFound(format!("queue entry {id}")))?;

            let retry_count = retry_count.saturating_add(1);
            let next = if retryable && retry_count <= max_retries {
                EntryStatus::Pending
            } else {
                EntryStatus::Failed
            };

            tx.execute(
                "UPDATE sync_queue SET status = ?1, retry_count = ?2, last_error = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![next.as_str(), retry_count, message, now_timestamp(), id],
            )
            .map_err(|e| SyncError::Database(format!("Failed to record failure for {id}: {e}")))?;

            status::set_last_error(tx, Some(&message))?;
            status::refresh_pending_count(tx)?;
            Ok(next)
        })
    }

    /// Whether an Insert creating `record_id` is still waiting or running.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn has_outstanding_insert(&self, table: &str, record_id: &str) -> Result<bool, SyncError> {
        self.store.read(|conn| {
            conn.query_row(
                "SELECT EXISTS(
                   SELECT 1 FROM sync_queue
                   WHERE table_name = ?1 AND record_id = ?2 AND operation = 'insert'
                     AND status IN ('pending', 'processing')
                 )",
                params![table, record_id],
                |row| row.get(0),
            )
            .map_err(|e| SyncError::Database(format!("Failed to look up insert: {e}")))
        })
    }

    /// Move a failed entry back to pending for one more attempt.
    ///
    /// `retry_count` is kept, so the entry fails again terminally on its next
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no failed entry has this ID.
    pub fn retry_failed(&self, id: i64) -> Result<(), SyncError> {
        self.store.write(|tx| {
            let rows = tx
                .execute(
                    "UPDATE sync_queue SET status = 'pending', updated_at = ?1
                     WHERE id = ?2 AND status = 'failed'",
                    params![now_timestamp(), id],
                )
                .map_err(|e| SyncError::Database(format!("Failed to retry entry {id}: {e}")))?;
            if rows == 0 {
                return Err(SyncError::NotFound(format!("failed queue entry {id}")));
            }
            status::refresh_pending_count(tx)
        })
    }

    /// Move every failed entry back to pending. Returns how many moved.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn retry_all_failed(&self) -> Result<usize, SyncError> {
        self.store.write(|tx| {
            let rows = tx
                .execute(
                    "UPDATE sync_queue SET status = 'pending', updated_at = ?1 WHERE status = 'failed'",
                    [now_timestamp()],
                )
                .map_err(|e| SyncError::Database(format!("Failed to retry entries: {e}")))?;
            status::refresh_pending_count(tx)?;
            Ok(rows)
        })
    }

    /// Delete completed entries last touched before `older_than` ago.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` for a negative age or one reaching past
    /// the representable calendar, or a store error if the delete fails.
    pub fn purge_completed(&self, older_than: chrono::Duration) -> Result<usize, SyncError> {
        if older_than < chrono::Duration::zero() {
            return Err(SyncError::Config("purge age must not be negative".to_string()));
        }
        let cutoff = Utc::now()
            .checked_sub_signed(older_than)
            .map(format_timestamp)
            .ok_or_else(|| {
                SyncError::Config(format!(
                    "purge age of {} hours is out of range",
                    older_than.num_hours()
                ))
            })?;
        self.store.write(|tx| {
            tx.execute(
                "DELETE FROM sync_queue WHERE status = 'completed' AND updated_at < ?1",
                [cutoff],
            )
            .map_err(|e| SyncError::Database(format!("Failed to purge completed entries: {e}")))
        })
    }

    /// Return entries stuck in `processing` to `pending`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn recover_in_flight(&self) -> Result<usize, SyncError> {
        self.store.write(|tx| {
            let rows = recover_in_flight(tx)?;
            status::refresh_pending_count(tx)?;
            Ok(rows)
        })
    }

    /// Entries still awaiting the remote (`pending` + `processing`).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn pending_count(&self) -> Result<i64, SyncError> {
        self.store.read(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE status IN ('pending', 'processing')",
                [],
                |row| row.get(0),
            )
            .map_err(|e| SyncError::Database(format!("Failed to count pending: {e}")))
        })
    }

    /// Get queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stats(&self) -> Result<QueueStats, SyncError> {
        self.store.read(|conn| {
            let mut stats = QueueStats::default();

            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")
                .map_err(|e| SyncError::Database(format!("Failed to prepare query: {e}")))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(|e| SyncError::Database(format!("Failed to count entries: {e}")))?;

            for row in rows {
                let (state, count) = row.map_err(|e| SyncError::Database(e.to_string()))?;
                match state.parse::<EntryStatus>()? {
                    EntryStatus::Pending => stats.pending = count,
                    EntryStatus::Processing => stats.processing = count,
                    EntryStatus::Completed => stats.completed = count,
                    EntryStatus::Failed => stats.failed = count,
                }
            }

            let oldest_pending: Option<String> = conn
                .query_row(
                    "SELECT MIN(created_at) FROM sync_queue WHERE status = 'pending'",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| SyncError::Database(format!("Failed to get oldest pending: {e}")))?;
            stats.oldest_pending = oldest_pending.as_deref().map(parse_timestamp);

            Ok(stats)
        })
    }
}

/// Insert a new pending entry. Used by the store inside its mutation
/// transaction.
pub(crate) fn insert_entry(conn: &Connection, new: &NewEntry<'_>) -> Result<QueueEntry, SyncError> {
    let now = now_timestamp();
    let payload = serde_json::to_string(new.payload)?;

    conn.execute(
        r"INSERT INTO sync_queue
            (table_name, operation, record_id, payload, priority, retry_count, max_retries,
             status, created_at, updated_at)
          VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, 'pending', ?7, ?7)",
        params![
            new.table_name,
            new.operation.as_str(),
            new.record_id,
            payload,
            new.priority,
            new.max_retries,
            now,
        ],
    )
    .map_err(|e| SyncError::Database(format!("Failed to enqueue entry: {e}")))?;

    let id = conn.last_insert_rowid();
    get_entry(conn, id)?.ok_or_else(|| SyncError::NotFound(format!("queue entry {id}")))
}

/// Return entries left in `processing` by an interrupted pass to `pending`.
pub(crate) fn recover_in_flight(conn: &Connection) -> Result<usize, SyncError> {
    conn.execute(
        "UPDATE sync_queue SET status = 'pending', updated_at = ?1 WHERE status = 'processing'",
        [now_timestamp()],
    )
    .map_err(|e| SyncError::Database(format!("Failed to recover in-flight entries: {e}")))
}

fn set_status(conn: &Connection, id: i64, next: EntryStatus) -> Result<(), SyncError> {
    let rows = conn
        .execute(
            "UPDATE sync_queue SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![next.as_str(), now_timestamp(), id],
        )
        .map_err(|e| SyncError::Database(format!("Failed to set entry {id} {next}: {e}")))?;

    if rows == 0 {
        return Err(SyncError::NotFound(format!("queue entry {id}")));
    }
    Ok(())
}

fn has_outstanding_for_record(
    conn: &Connection,
    table: &str,
    record_id: &str,
    except: i64,
) -> Result<bool, SyncError> {
    conn.query_row(
        "SELECT EXISTS(
           SELECT 1 FROM sync_queue
           WHERE table_name = ?1 AND record_id = ?2 AND id != ?3
             AND status IN ('pending', 'processing')
         )",
        params![table, record_id, except],
        |row| row.get(0),
    )
    .map_err(|e| SyncError::Database(format!("Failed to look up queued mutations: {e}")))
}

fn get_entry(conn: &Connection, id: i64) -> Result<Option<QueueEntry>, SyncError> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE id = ?1"),
        [id],
        row_to_entry,
    )
    .optional()
    .map_err(|e| SyncError::Database(format!("Failed to query entry {id}: {e}")))
}

fn query_entries(
    conn: &Connection,
    clause: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<QueueEntry>, SyncError> {
    let mut stmt = conn
        .prepare(&format!("SELECT {ENTRY_COLUMNS} FROM sync_queue {clause}"))
        .map_err(|e| SyncError::Database(format!("Failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map(params, row_to_entry)
        .map_err(|e| SyncError::Database(format!("Failed to query entries: {e}")))?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row.map_err(|e| SyncError::Database(e.to_string()))?);
    }
    Ok(entries)
}

fn conversion_error(index: usize, err: SyncError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn row_to_entry(row: &Row<'_>) -> Result<QueueEntry, rusqlite::Error> {
    let operation: String = row.get(2)?;
    let payload: String = row.get(4)?;
    let status: String = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(QueueEntry {
        id: row.get(0)?,
        table_name: row.get(1)?,
        operation: operation
            .parse::<Operation>()
            .map_err(|e| conversion_error(2, e))?,
        record_id: row.get(3)?,
        payload: serde_json::from_str(&payload).map_err(|e| conversion_error(4, e.into()))?,
        priority: row.get(5)?,
        retry_count: row.get(6)?,
        max_retries: row.get(7)?,
        last_error: row.get(8)?,
        status: status
            .parse::<EntryStatus>()
            .map_err(|e| conversion_error(9, e))?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}
