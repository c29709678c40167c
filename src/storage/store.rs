//! The local durable store.
//!
//! [`LocalStore`] owns the single `SQLite` connection. All access to the
//! queue and the offline status row goes through its transaction helpers,
//! so an entity write and its queue entry commit together or not at all.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, Transaction};

use crate::error::SyncError;
use crate::sync::entry::{NewEntry, Operation, QueueEntry};
use crate::sync::queue;

use super::entities::{self, EntityRecord, LocalEntity};
use super::status::{self, OfflineStatus};
use super::{now_timestamp, schema, Database};

/// Crash-safe persistence for entities and sync bookkeeping.
pub struct LocalStore {
    db: Mutex<Database>,
    default_max_retries: u32,
}

impl LocalStore {
    /// Open the store at a path. Call [`LocalStore::initialize`] before use.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: &Path, default_max_retries: u32) -> Result<Self, SyncError> {
        Ok(Self::from_database(Database::open_at(path)?, default_max_retries))
    }

    /// Open an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_in_memory(default_max_retries: u32) -> Result<Self, SyncError> {
        Ok(Self::from_database(Database::open_in_memory()?, default_max_retries))
    }

    /// Wrap an already opened database.
    #[must_use]
    pub fn from_database(db: Database, default_max_retries: u32) -> Self {
        Self {
            db: Mutex::new(db),
            default_max_retries,
        }
    }

    /// Apply pending migrations and recover entries interrupted by a crash.
    ///
    /// Idempotent; call once per process start. Returns the schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration or the recovery fails. Startup must
    /// not continue in that case.
    pub fn initialize(&self) -> Result<i32, SyncError> {
        let mut db = self.lock()?;
        db.migrate()?;

        let tx = db.transaction()?;
        let recovered = queue::recover_in_flight(&tx)?;
        status::refresh_pending_count(&tx)?;
        tx.commit()
            .map_err(|e| SyncError::Database(format!("Failed to commit recovery: {e}")))?;

        if recovered > 0 {
            tracing::warn!(recovered, "returned interrupted entries to pending");
        }

        db.schema_version()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>, SyncError> {
        self.db
            .lock()
            .map_err(|_| SyncError::Database("store lock poisoned".to_string()))
    }

    /// Run a read against the connection.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let db = self.lock()?;
        f(db.connection())
    }

    /// Run `f` in a transaction, committing only if it succeeds.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let mut db = self.lock()?;
        let tx = db.transaction()?;
        let out = f(&tx)?;
        tx.commit()
            .map_err(|e| SyncError::Database(format!("Failed to commit transaction: {e}")))?;
        Ok(out)
    }

    /// Write an entity change and enqueue its queue entry in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTable` for unsynchronized tables, `NotFound` when
    /// updating or deleting a missing row, or a store error. Nothing is
    /// written on error.
    pub fn apply_local_mutation(
        &self,
        entity: &EntityRecord,
        operation: Operation,
        priority: i32,
    ) -> Result<QueueEntry, SyncError> {
        let schema = schema::require(&entity.table)?;

        let entry = self.write(|tx| {
            // Updates queue the merged row; the remote replaces the whole entity.
            let payload = match operation {
                Operation::Insert => {
                    entities::insert_local(tx, schema, entity)?;
                    entity.payload()
                },
                Operation::Update => entities::update_local(tx, schema, entity)?,
                Operation::Delete => {
                    entities::mark_deleted(tx, schema, &entity.id)?;
                    entity.payload()
                },
            };

            let entry = queue::insert_entry(
                tx,
                &NewEntry {
                    table_name: schema.table,
                    operation,
                    record_id: &entity.id,
                    payload: &payload,
                    priority,
                    max_retries: self.default_max_retries,
                },
            )?;
            status::refresh_pending_count(tx)?;
            Ok(entry)
        })?;

        tracing::debug!(
            entry_id = entry.id,
            table = %entry.table_name,
            operation = %operation,
            record_id = %entry.record_id,
            "queued local mutation"
        );
        Ok(entry)
    }

    /// Read the offline status row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read.
    pub fn offline_status(&self) -> Result<OfflineStatus, SyncError> {
        self.read(status::read)
    }

    /// Record reachability; returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be updated.
    pub fn set_online(&self, online: bool) -> Result<bool, SyncError> {
        self.write(|tx| status::set_online(tx, online))
    }

    /// Stamp `last_sync_at`; a clean pass also clears `last_error`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be updated.
    pub fn record_sync_completed(&self, clean: bool) -> Result<(), SyncError> {
        self.write(|tx| {
            status::set_last_sync(tx, &now_timestamp())?;
            if clean {
                status::set_last_error(tx, None)?;
            }
            Ok(())
        })
    }

    /// Record the most recent error shown by the status query.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be updated.
    pub fn record_error(&self, error: &str) -> Result<(), SyncError> {
        self.write(|tx| status::set_last_error(tx, Some(error)))
    }

    /// Load an entity row.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTable` or a store error.
    pub fn entity(&self, table: &str, id: &str) -> Result<Option<LocalEntity>, SyncError> {
        let schema = schema::require(table)?;
        self.read(|conn| entities::get(conn, schema, id))
    }

    /// Upsert records downloaded from the remote authority in one transaction.
    ///
    /// Returns `(upserted, skipped)`; rows with unconfirmed local changes are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTable` or a store error; nothing is written on error.
    pub fn upsert_remote(
        &self,
        table: &str,
        records: &[EntityRecord],
    ) -> Result<(usize, usize), SyncError> {
        let schema = schema::require(table)?;
        self.write(|tx| {
            let mut upserted = 0;
            for record in records {
                if entities::upsert_remote(tx, schema, record)? {
                    upserted += 1;
                }
            }
            Ok((upserted, records.len() - upserted))
        })
    }

}
