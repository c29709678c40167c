//! Storage layer for erp-sync.
//!
//! This module provides SQLite-based persistence for:
//! - Synchronized entity tables (customers, products, sales, sale items)
//! - The sync queue (pending mutations)
//! - The offline status singleton

mod database;
pub mod entities;
mod migrations;
pub mod schema;
pub mod status;
mod store;

use chrono::{DateTime, SecondsFormat, Utc};

pub use database::Database;
pub use entities::{EntityRecord, LocalEntity, RemapSummary};
pub use migrations::CURRENT_VERSION;
pub use status::OfflineStatus;
pub use store::LocalStore;

/// Current time in the fixed-width format stored in every timestamp column.
///
/// Fixed width keeps lexical and chronological order identical.
pub(crate) fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |t| t.with_timezone(&Utc))
}
