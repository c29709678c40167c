//! Database migrations for erp-sync.
//!
//! Each migration upgrades the schema by one version and runs in its own
//! transaction together with the `user_version` bump, so a crash leaves the
//! database at either the old or the new version.

use rusqlite::Connection;

use crate::error::SyncError;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Get the current schema version from the database.
///
/// Returns 0 if no version has been set (new database).
pub fn get_version(conn: &Connection) -> Result<i32, SyncError> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| SyncError::Database(format!("Failed to get schema version: {e}")))
}

fn set_version(conn: &Connection, version: i32) -> Result<(), SyncError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| SyncError::Database(format!("Failed to set schema version: {e}")))
}

/// Run all pending migrations.
pub fn run(conn: &mut Connection) -> Result<(), SyncError> {
    let current = get_version(conn)?;

    if current > CURRENT_VERSION {
        return Err(SyncError::Database(format!(
            "Database schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    for version in (current + 1)..=CURRENT_VERSION {
        let tx = conn
            .transaction()
            .map_err(|e| SyncError::Database(format!("Failed to begin migration: {e}")))?;
        run_migration(&tx, version)?;
        set_version(&tx, version)?;
        tx.commit().map_err(|e| {
            SyncError::Database(format!("Failed to commit migration v{version}: {e}"))
        })?;
        tracing::info!(version, "applied schema migration");
    }

    Ok(())
}

fn run_migration(conn: &Connection, version: i32) -> Result<(), SyncError> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(SyncError::Database(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: sync bookkeeping.
///
/// Creates `sync_queue` and the `offline_status` singleton row.
fn migrate_v1(conn: &Connection) -> Result<(), SyncError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            table_name TEXT NOT NULL,
            operation TEXT NOT NULL CHECK (operation IN ('insert', 'update', 'delete')),
            record_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 5,
            last_error TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sync_queue_dequeue
        ON sync_queue(status, priority DESC, created_at ASC, id ASC);

        CREATE INDEX IF NOT EXISTS idx_sync_queue_record
        ON sync_queue(table_name, record_id);

        CREATE TABLE IF NOT EXISTS offline_status (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            is_online INTEGER NOT NULL DEFAULT 0,
            last_sync_at TEXT,
            pending_sync_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            updated_at TEXT NOT NULL
        );

        INSERT OR IGNORE INTO offline_status (id, is_online, pending_sync_count, updated_at)
        VALUES (1, 0, 0, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
        ",
    )
    .map_err(|e| SyncError::Database(format!("Migration v1 failed: {e}")))
}

/// Migration v2: synchronized entity tables.
///
/// Foreign-key columns mirror the payload field of the same name and are
/// left unconstrained so an identifier can be remapped in place.
fn migrate_v2(conn: &Connection) -> Result<(), SyncError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            is_synced INTEGER NOT NULL DEFAULT 0,
            pending_delete INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            is_synced INTEGER NOT NULL DEFAULT 0,
            pending_delete INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sales (
            id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            customer_id TEXT,
            is_synced INTEGER NOT NULL DEFAULT 0,
            pending_delete INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sales_customer ON sales(customer_id);

        CREATE TABLE IF NOT EXISTS sale_items (
            id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            sale_id TEXT,
            product_id TEXT,
            is_synced INTEGER NOT NULL DEFAULT 0,
            pending_delete INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sale_items_sale ON sale_items(sale_id);
        CREATE INDEX IF NOT EXISTS idx_sale_items_product ON sale_items(product_id);
        ",
    )
    .map_err(|e| SyncError::Database(format!("Migration v2 failed: {e}")))
}
