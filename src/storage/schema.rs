//! Registry of synchronized entity tables.
//!
//! Table names reach SQL only through this registry, so a `table_name`
//! read from a queue entry or a caller can never inject SQL.

use uuid::Uuid;

use crate::error::SyncError;

/// Prefix marking an identifier the remote authority has not confirmed yet.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// A column holding the identifier of an entity in another table.
///
/// The column name doubles as the payload field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub target: &'static str,
}

/// A synchronized entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySchema {
    /// Local table name.
    pub table: &'static str,
    /// REST resource path segment on the remote authority.
    pub resource: &'static str,
    /// Columns pointing at other entities.
    pub foreign_keys: &'static [ForeignKey],
}

impl EntitySchema {
    /// Foreign-key column names in declaration order.
    pub fn foreign_key_columns(&self) -> impl Iterator<Item = &'static str> {
        self.foreign_keys.iter().map(|fk| fk.column)
    }
}

/// All tables the engine synchronizes.
pub const ENTITY_SCHEMAS: &[EntitySchema] = &[
    EntitySchema {
        table: "customers",
        resource: "customers",
        foreign_keys: &[],
    },
    EntitySchema {
        table: "products",
        resource: "products",
        foreign_keys: &[],
    },
    EntitySchema {
        table: "sales",
        resource: "sales",
        foreign_keys: &[ForeignKey {
            column: "customer_id",
            target: "customers",
        }],
    },
    EntitySchema {
        table: "sale_items",
        resource: "sale-items",
        foreign_keys: &[
            ForeignKey {
                column: "sale_id",
                target: "sales",
            },
            ForeignKey {
                column: "product_id",
                target: "products",
            },
        ],
    },
];

/// Find the schema for a table.
#[must_use]
pub fn lookup(table: &str) -> Option<&'static EntitySchema> {
    ENTITY_SCHEMAS.iter().find(|s| s.table == table)
}

/// Find the schema for a table, failing for unknown tables.
///
/// # Errors
///
/// Returns `SyncError::UnknownTable` if the table is not synchronized.
pub fn require(table: &str) -> Result<&'static EntitySchema, SyncError> {
    lookup(table).ok_or_else(|| SyncError::UnknownTable(table.to_string()))
}

/// Every (table, foreign key) pair that points at `target`.
pub fn referencing(
    target: &str,
) -> impl Iterator<Item = (&'static EntitySchema, &'static ForeignKey)> + '_ {
    ENTITY_SCHEMAS.iter().flat_map(move |schema| {
        schema
            .foreign_keys
            .iter()
            .filter(move |fk| fk.target == target)
            .map(move |fk| (schema, fk))
    })
}

/// Generate a fresh provisional identifier.
#[must_use]
pub fn new_local_id() -> String {
    format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4())
}

/// Whether an identifier is still provisional.
#[must_use]
pub fn is_provisional(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}
