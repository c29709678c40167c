//! `SQLite` database connection and operations.
//!
//! The database is stored at `~/.erp-sync/erp-sync.db` and contains:
//! - The synchronized entity tables (see [`super::schema`])
//! - `sync_queue`: pending mutations awaiting the remote authority
//! - `offline_status`: the singleton connectivity/sync status row

use std::time::Duration;

use rusqlite::{Connection, Transaction};

use crate::error::SyncError;

use super::migrations;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at a specific path.
    ///
    /// Does not touch the schema; call [`Database::migrate`] for that.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_at(path: &std::path::Path) -> Result<Self, SyncError> {
        let conn = Connection::open(path).map_err(|e| {
            SyncError::Database(format!("Failed to open database {}: {e}", path.display()))
        })?;

        // WAL keeps readers unblocked while a pass writes.
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
            .map_err(|e| SyncError::Database(format!("Failed to enable WAL: {e}")))?;

        Self::configure(conn)
    }

    /// Open an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            SyncError::Database(format!("Failed to open in-memory database: {e}"))
        })?;

        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self, SyncError> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = FULL;")
            .map_err(|e| SyncError::Database(format!("Failed to configure connection: {e}")))?;

        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| SyncError::Database(format!("Failed to set busy timeout: {e}")))?;

        Ok(Self { conn })
    }

    /// Run pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if any migration fails.
    pub fn migrate(&mut self) -> Result<(), SyncError> {
        migrations::run(&mut self.conn)
    }

    /// Get the current schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub fn schema_version(&self) -> Result<i32, SyncError> {
        migrations::get_version(&self.conn)
    }

    /// Get a reference to the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    pub fn transaction(&mut self) -> Result<Transaction<'_>, SyncError> {
        self.conn
            .transaction()
            .map_err(|e| SyncError::Database(format!("Failed to begin transaction: {e}")))
    }
}
