//! Bulk download of reference data.
//!
//! Pulls every record of the configured tables from the remote and upserts
//! them locally, leaving rows with unconfirmed local changes untouched.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::remote::RemoteApi;
use crate::error::SyncError;
use crate::storage::{schema, LocalStore};

/// Per-table download result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRefresh {
    pub table: String,
    pub fetched: usize,
    pub upserted: usize,
    /// Rows kept because they hold unconfirmed local changes
    pub skipped: usize,
}

/// A table whose download failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableFailure {
    pub table: String,
    pub error: String,
}

/// Result of one refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub tables: Vec<TableRefresh>,
    pub failures: Vec<TableFailure>,
}

impl DownloadReport {
    /// Whether every table refreshed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Downloads reference tables from the remote authority.
pub struct BulkDownloader {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteApi>,
    tables: Vec<String>,
    request_timeout: Duration,
}

impl BulkDownloader {
    #[must_use]
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteApi>,
        tables: Vec<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            tables,
            request_timeout,
        }
    }

    /// Refresh every configured table.
    ///
    /// A table that cannot be fetched is reported and the rest still run.
    ///
    /// # Errors
    ///
    /// Returns an error only for local store failures.
    pub async fn refresh(&self) -> Result<DownloadReport, SyncError> {
        let mut report = DownloadReport::default();

        for table in &self.tables {
            match self.refresh_table(table).await {
                Ok(refresh) => {
                    tracing::debug!(
                        table = %refresh.table,
                        fetched = refresh.fetched,
                        skipped = refresh.skipped,
                        "reference table refreshed"
                    );
                    report.tables.push(refresh);
                },
                Err(e) if e.is_local_store() => return Err(e),
                Err(e) => {
                    tracing::warn!(table = %table, error = %e, "reference download failed");
                    report.failures.push(TableFailure {
                        table: table.clone(),
                        error: e.to_string(),
                    });
                },
            }
        }

        Ok(report)
    }

    async fn refresh_table(&self, table: &str) -> Result<TableRefresh, SyncError> {
        let schema = schema::require(table)?;

        let records = tokio::time::timeout(self.request_timeout, self.remote.fetch_all(schema))
            .await
            .map_err(|_| SyncError::Connectivity(format!("download of {table} timed out")))??;

        let (upserted, skipped) = self.store.upsert_remote(table, &records)?;

        Ok(TableRefresh {
            table: table.to_string(),
            fetched: records.len(),
            upserted,
            skipped,
        })
    }
}
