//! The `offline_status` singleton row.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::SyncError;

use super::{now_timestamp, parse_timestamp};

/// Connectivity and sync bookkeeping shown to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfflineStatus {
    pub is_online: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Entries still awaiting the remote (`pending` + `processing`).
    pub pending_sync_count: i64,
    /// Most recent entry or pass error.
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn read(conn: &Connection) -> Result<OfflineStatus, SyncError> {
    conn.query_row(
        "SELECT is_online, last_sync_at, pending_sync_count, last_error, updated_at
         FROM offline_status WHERE id = 1",
        [],
        |row| {
            let last_sync_at: Option<String> = row.get(1)?;
            let updated_at: String = row.get(4)?;
            Ok(OfflineStatus {
                is_online: row.get(0)?,
                last_sync_at: last_sync_at.as_deref().map(parse_timestamp),
                pending_sync_count: row.get(2)?,
                last_error: row.get(3)?,
                updated_at: parse_timestamp(&updated_at),
            })
        },
    )
    .map_err(|e| SyncError::Database(format!("Failed to read offline status: {e}")))
}

/// Store the probe result and return the previous value.
///
/// Must run inside a transaction for the read and the write to be atomic.
pub(crate) fn set_online(conn: &Connection, online: bool) -> Result<bool, SyncError> {
    let previous: bool = conn
        .query_row("SELECT is_online FROM offline_status WHERE id = 1", [], |row| {
            row.get(0)
        })
        .map_err(|e| SyncError::Database(format!("Failed to read online flag: {e}")))?;

    conn.execute(
        "UPDATE offline_status SET is_online = ?1, updated_at = ?2 WHERE id = 1",
        params![online, now_timestamp()],
    )
    .map_err(|e| SyncError::Database(format!("Failed to update online flag: {e}")))?;

    Ok(previous)
}

pub(crate) fn set_last_sync(conn: &Connection, at: &str) -> Result<(), SyncError> {
    conn.execute(
        "UPDATE offline_status SET last_sync_at = ?1, updated_at = ?1 WHERE id = 1",
        [at],
    )
    .map_err(|e| SyncError::Database(format!("Failed to record last sync: {e}")))?;
    Ok(())
}

pub(crate) fn set_last_error(conn: &Connection, error: Option<&str>) -> Result<(), SyncError> {
    conn.execute(
        "UPDATE offline_status SET last_error = ?1, updated_at = ?2 WHERE id = 1",
        params![error, now_timestamp()],
    )
    .map_err(|e| SyncError::Database(format!("Failed to record last error: {e}")))?;
    Ok(())
}

/// Recompute `pending_sync_count` from the queue.
///
/// Called inside every transaction that changes an entry's status.
pub(crate) fn refresh_pending_count(conn: &Connection) -> Result<(), SyncError> {
    conn.execute(
        "UPDATE offline_status SET
           pending_sync_count = (
             SELECT COUNT(*) FROM sync_queue WHERE status IN ('pending', 'processing')
           ),
           updated_at = ?1
         WHERE id = 1",
        [now_timestamp()],
    )
    .map_err(|e| SyncError::Database(format!("Failed to refresh pending count: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    fn migrated() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_initial_status_is_offline() {
        let db = migrated();
        let status = read(db.connection()).unwrap();

        assert!(!status.is_online);
        assert!(status.last_sync_at.is_none());
        assert_eq!(status.pending_sync_count, 0);
    }

    #[test]
    fn test_set_online_returns_previous() {
        let db = migrated();

        assert!(!set_online(db.connection(), true).unwrap());
        assert!(set_online(db.connection(), true).unwrap());
        assert!(set_online(db.connection(), false).unwrap());
        assert!(!read(db.connection()).unwrap().is_online);
    }

    #[test]
    fn test_last_error_can_be_cleared() {
        let db = migrated();

        set_last_error(db.connection(), Some("remote rejected")).unwrap();
        assert_eq!(
            read(db.connection()).unwrap().last_error.as_deref(),
            Some("remote rejected")
        );

        set_last_error(db.connection(), None).unwrap();
        assert!(read(db.connection()).unwrap().last_error.is_none());
    }
}
