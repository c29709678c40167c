//! Entity rows: local writes, downloader upserts and identifier remapping.
//!
//! Every function takes a `&Connection` so callers can compose them inside
//! one transaction (a `Transaction` derefs to a `Connection`).

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

use super::schema::{self, EntitySchema};
use super::{now_timestamp, parse_timestamp};

/// Fields that only exist locally and are never sent to the remote.
const LOCAL_ONLY_FIELDS: &[&str] = &["id", "is_synced", "pending_delete"];

/// A synchronized domain object: its table, identifier and domain fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub table: String,
    pub id: String,
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    /// A new record with a fresh provisional identifier.
    pub fn new_local(table: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            table: table.into(),
            id: schema::new_local_id(),
            fields,
        }
    }

    /// A record with a known identifier.
    pub fn with_id(table: impl Into<String>, id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
            fields,
        }
    }

    /// Build a record from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Parse` if `value` is not an object.
    pub fn from_value(
        table: impl Into<String>,
        id: impl Into<String>,
        value: Value,
    ) -> Result<Self, SyncError> {
        match value {
            Value::Object(fields) => Ok(Self::with_id(table, id, fields)),
            other => Err(SyncError::Parse(format!("entity fields must be an object, got {other}"))),
        }
    }

    /// Domain fields as sent to the remote authority.
    #[must_use]
    pub fn payload(&self) -> Value {
        let fields = self
            .fields
            .iter()
            .filter(|(key, _)| !LOCAL_ONLY_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Value::Object(fields)
    }

    /// The identifier held in a foreign-key field, if any.
    #[must_use]
    pub fn foreign_key(&self, column: &str) -> Option<String> {
        self.fields.get(column).and_then(id_from_value)
    }
}

/// An entity row together with its sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalEntity {
    pub record: EntityRecord,
    pub is_synced: bool,
    pub pending_delete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rows touched by one identifier remap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemapSummary {
    pub entity_rows: usize,
    pub reference_rows: usize,
    pub queue_entries: usize,
}

/// Read an identifier from a JSON value; remote ids may be numbers.
pub(crate) fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn write_row(
    conn: &Connection,
    schema: &EntitySchema,
    record: &EntityRecord,
    synced: bool,
    upsert: bool,
) -> Result<usize, SyncError> {
    let now = now_timestamp();
    let payload = serde_json::to_string(&record.payload())?;

    let mut columns = vec!["id", "payload"];
    let mut values = vec![SqlValue::Text(record.id.clone()), SqlValue::Text(payload)];
    for column in schema.foreign_key_columns() {
        columns.push(column);
        values.push(record.foreign_key(column).map_or(SqlValue::Null, SqlValue::Text));
    }
    columns.extend(["is_synced", "pending_delete", "created_at", "updated_at"]);
    values.extend([
        SqlValue::Integer(i64::from(synced)),
        SqlValue::Integer(0),
        SqlValue::Text(now.clone()),
        SqlValue::Text(now),
    ]);

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        schema.table,
        columns.join(", "),
        placeholders.join(", ")
    );

    if upsert {
        // Rows with unconfirmed local changes keep the local version.
        let mut assignments = vec!["payload = excluded.payload".to_string()];
        assignments.extend(
            schema
                .foreign_key_columns()
                .map(|column| format!("{column} = excluded.{column}")),
        );
        assignments.push("updated_at = excluded.updated_at".to_string());
        sql.push_str(&format!(
            " ON CONFLICT(id) DO UPDATE SET {} WHERE {table}.is_synced = 1 AND {table}.pending_delete = 0",
            assignments.join(", "),
            table = schema.table
        ));
    }

    conn.execute(&sql, params_from_iter(values)).map_err(|e| {
        SyncError::Database(format!(
            "Failed to write {}/{}: {e}",
            schema.table, record.id
        ))
    })
}

/// Insert a locally created entity, not yet confirmed by the remote.
pub(crate) fn insert_local(
    conn: &Connection,
    schema: &EntitySchema,
    record: &EntityRecord,
) -> Result<(), SyncError> {
    write_row(conn, schema, record, false, false)?;
    Ok(())
}

/// Merge fields into a local entity and flag it as unsynced.
///
/// Fields absent from `record` keep their stored value; a `null` field is
/// removed. Foreign-key columns are only rewritten when their field is
/// present. Returns the merged payload.
pub(crate) fn update_local(
    conn: &Connection,
    schema: &EntitySchema,
    record: &EntityRecord,
) -> Result<Value, SyncError> {
    let patch = serde_json::to_string(&record.payload())?;

    let mut assignments = vec![
        "payload = json_patch(payload, ?1)".to_string(),
        "is_synced = 0".to_string(),
    ];
    let mut values = vec![SqlValue::Text(patch)];
    for column in schema
        .foreign_key_columns()
        .filter(|column| record.fields.contains_key(*column))
    {
        values.push(record.foreign_key(column).map_or(SqlValue::Null, SqlValue::Text));
        assignments.push(format!("{column} = ?{}", values.len()));
    }
    values.push(SqlValue::Text(now_timestamp()));
    assignments.push(format!("updated_at = ?{}", values.len()));
    values.push(SqlValue::Text(record.id.clone()));

    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?{} AND pending_delete = 0 RETURNING payload",
        schema.table,
        assignments.join(", "),
        values.len()
    );

    let merged: Option<String> = conn
        .query_row(&sql, params_from_iter(values), |row| row.get(0))
        .optional()
        .map_err(|e| SyncError::Database(format!("Failed to update {}/{}: {e}", schema.table, record.id)))?;

    match merged {
        Some(payload) => Ok(serde_json::from_str(&payload)?),
        None => Err(SyncError::NotFound(format!("{}/{}", schema.table, record.id))),
    }
}

/// Flag an entity for deletion; the row goes away once the remote confirms.
pub(crate) fn mark_deleted(conn: &Connection, schema: &EntitySchema, id: &str) -> Result<(), SyncError> {
    let rows = conn
        .execute(
            &format!(
                "UPDATE {} SET pending_delete = 1, is_synced = 0, updated_at = ?1 WHERE id = ?2",
                schema.table
            ),
            params![now_timestamp(), id],
        )
        .map_err(|e| SyncError::Database(format!("Failed to mark {}/{id} deleted: {e}", schema.table)))?;

    if rows == 0 {
        return Err(SyncError::NotFound(format!("{}/{id}", schema.table)));
    }
    Ok(())
}

pub(crate) fn mark_synced(conn: &Connection, schema: &EntitySchema, id: &str) -> Result<(), SyncError> {
    conn.execute(
        &format!("UPDATE {} SET is_synced = 1 WHERE id = ?1", schema.table),
        [id],
    )
    .map_err(|e| SyncError::Database(format!("Failed to mark {}/{id} synced: {e}", schema.table)))?;
    Ok(())
}

pub(crate) fn delete_row(conn: &Connection, schema: &EntitySchema, id: &str) -> Result<(), SyncError> {
    conn.execute(&format!("DELETE FROM {} WHERE id = ?1", schema.table), [id])
        .map_err(|e| SyncError::Database(format!("Failed to delete {}/{id}: {e}", schema.table)))?;
    Ok(())
}

/// Upsert a record received from the remote authority.
///
/// Returns `false` when the local row has unconfirmed changes and was left
/// untouched.
pub(crate) fn upsert_remote(
    conn: &Connection,
    schema: &EntitySchema,
    record: &EntityRecord,
) -> Result<bool, SyncError> {
    Ok(write_row(conn, schema, record, true, true)? > 0)
}

pub(crate) fn get(
    conn: &Connection,
    schema: &EntitySchema,
    id: &str,
) -> Result<Option<LocalEntity>, SyncError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT payload, is_synced, pending_delete, created_at, updated_at
                 FROM {} WHERE id = ?1",
                schema.table
            ),
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()
        .map_err(|e| SyncError::Database(format!("Failed to load {}/{id}: {e}", schema.table)))?;

    let Some((payload, is_synced, pending_delete, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let record = EntityRecord::from_value(schema.table, id, serde_json::from_str(&payload)?)?;
    Ok(Some(LocalEntity {
        record,
        is_synced,
        pending_delete,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    }))
}

/// Replace a provisional identifier with the remote-assigned one everywhere.
///
/// Touches the entity's primary key, every foreign-key column and payload
/// field that points at it, and all unfinished queue entries that name it.
/// Must run inside the transaction that completes the queue entry; on error
/// the caller drops the transaction and nothing is applied.
pub(crate) fn remap_identifier(
    conn: &Connection,
    schema: &EntitySchema,
    local_id: &str,
    remote_id: &str,
) -> Result<RemapSummary, SyncError> {
    let mut summary = RemapSummary::default();
    if local_id == remote_id {
        return Ok(summary);
    }

    let taken: bool = conn
        .query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", schema.table),
            [remote_id],
            |row| row.get(0),
        )
        .map_err(|e| SyncError::Database(format!("Failed to check remap target: {e}")))?;

    if taken {
        return Err(SyncError::RemapConflict {
            table: schema.table.to_string(),
            local_id: local_id.to_string(),
            remote_id: remote_id.to_string(),
        });
    }

    let remap_err = |e: rusqlite::Error| {
        SyncError::Database(format!(
            "Failed to remap {}/{local_id} -> {remote_id}: {e}",
            schema.table
        ))
    };
    let now = now_timestamp();

    summary.entity_rows = conn
        .execute(
            &format!("UPDATE {} SET id = ?1 WHERE id = ?2", schema.table),
            params![remote_id, local_id],
        )
        .map_err(remap_err)?;

    for (referrer, fk) in schema::referencing(schema.table) {
        let path = format!("$.{}", fk.column);

        summary.reference_rows += conn
            .execute(
                &format!(
                    "UPDATE {table} SET {col} = ?1, payload = json_set(payload, ?2, ?1)
                     WHERE {col} = ?3",
                    table = referrer.table,
                    col = fk.column
                ),
                params![remote_id, path, local_id],
            )
            .map_err(remap_err)?;

        summary.queue_entries += conn
            .execute(
                "UPDATE sync_queue SET payload = json_set(payload, ?1, ?2), updated_at = ?3
                 WHERE table_name = ?4 AND status != 'completed'
                   AND json_extract(payload, ?1) = ?5",
                params![path, remote_id, now, referrer.table, local_id],
            )
            .map_err(remap_err)?;
    }

    summary.queue_entries += conn
        .execute(
            "UPDATE sync_queue SET record_id = ?1, updated_at = ?2
             WHERE table_name = ?3 AND record_id = ?4 AND status != 'completed'",
            params![remote_id, now, schema.table, local_id],
        )
        .map_err(remap_err)?;

    Ok(summary)
}
