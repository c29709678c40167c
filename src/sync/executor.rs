//! Sync executor for processing queued entries.
//!
//! One pass drains the queue in dequeue order, applying each entry against
//! the remote authority at most once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::entry::{EntryStatus, Operation, QueueEntry};
use super::queue::ChangeQueue;
use super::remote::RemoteApi;
use crate::error::SyncError;
use crate::storage::schema::{self, EntitySchema};

/// Configuration for the sync executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Entries fetched per dequeue
    pub batch_size: usize,
    /// Upper bound on a single remote call
    pub request_timeout: Duration,
    /// End the pass at the first connectivity failure
    pub stop_on_connectivity_error: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            request_timeout: Duration::from_secs(15),
            stop_on_connectivity_error: true,
        }
    }
}

/// What happened to one entry during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntryOutcome {
    /// Applied remotely; `remote_id` is set for inserts.
    Completed { remote_id: Option<String> },
    /// Failed, back to pending for a later pass
    Retrying,
    /// Failed terminally
    Failed,
    /// Waiting on the insert of a referenced entity; no attempt counted
    Deferred,
}

/// Result of executing a single entry.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub entry_id: i64,
    pub table: String,
    pub operation: Operation,
    pub record_id: String,
    #[serde(flatten)]
    pub outcome: EntryOutcome,
    pub error: Option<String>,
}

/// Result of one pass over the queue.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub deferred: usize,
    /// The pass ended early because the remote became unreachable.
    pub connectivity_lost: bool,
    pub results: Vec<ExecutionResult>,
}

impl PassReport {
    fn start() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            completed: 0,
            retried: 0,
            failed: 0,
            deferred: 0,
            connectivity_lost: false,
            results: Vec::new(),
        }
    }

    fn add(&mut self, result: ExecutionResult) {
        match result.outcome {
            EntryOutcome::Completed { .. } => self.completed += 1,
            EntryOutcome::Retrying => self.retried += 1,
            EntryOutcome::Failed => self.failed += 1,
            EntryOutcome::Deferred => self.deferred += 1,
        }
        self.results.push(result);
    }

    /// Total entries touched.
    #[must_use]
    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// No entry failed and the remote stayed reachable.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.retried == 0 && self.failed == 0 && !self.connectivity_lost
    }
}

/// A provisional reference that blocks an entry.
enum Blocker {
    /// The creating insert is still queued
    Waiting,
    /// Nothing will ever create the referenced entity
    Orphaned(SyncError),
}

/// Executor for processing sync queue entries.
pub struct SyncExecutor {
    queue: ChangeQueue,
    remote: Arc<dyn RemoteApi>,
    config: ExecutorConfig,
}

impl SyncExecutor {
    /// Create an executor with custom config.
    #[must_use]
    pub fn new(queue: ChangeQueue, remote: Arc<dyn RemoteApi>, config: ExecutorConfig) -> Self {
        Self {
            queue,
            remote,
            config,
        }
    }

    /// Run one pass over all pending entries.
    ///
    /// # Errors
    ///
    /// Returns an error only for local store failures; remote failures are
    /// recorded on the entries.
    pub async fn run_pass(&self) -> Result<PassReport, SyncError> {
        let mut report = PassReport::start();
        self.queue.recover_in_flight()?;

        let mut seen = HashSet::new();
        'pass: loop {
            let batch: Vec<QueueEntry> = self
                .queue
                .dequeue_batch(self.config.batch_size + seen.len())?
                .into_iter()
                .filter(|e| !seen.contains(&e.id))
                .collect();

            if batch.is_empty() {
                break;
            }

            for entry in batch {
                seen.insert(entry.id);

                let Some((result, lost)) = self.execute_one(entry.id).await? else {
                    continue;
                };
                report.add(result);

                if lost && self.config.stop_on_connectivity_error {
                    report.connectivity_lost = true;
                    tracing::warn!("remote unreachable, ending pass early");
                    break 'pass;
                }
            }
        }

        report.finished_at = Utc::now();
        tracing::info!(
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            deferred = report.deferred,
            "sync pass finished"
        );
        Ok(report)
    }

    /// Claim and execute one entry.
    ///
    /// Returns `None` if the entry was no longer pending, otherwise the result
    /// and whether the failure was a connectivity loss.
    async fn execute_one(&self, id: i64) -> Result<Option<(ExecutionResult, bool)>, SyncError> {
        if !self.queue.begin_processing(id)? {
            return Ok(None);
        }
        // Reload: an earlier remap in this pass may have rewritten the entry.
        let entry = self
            .queue
            .get(id)?
            .ok_or_else(|| SyncError::NotFound(format!("queue entry {id}")))?;

        let schema = match schema::require(&entry.table_name) {
            Ok(schema) => schema,
            Err(e) => return self.fail(&entry, e).map(Some),
        };

        match self.blocker(schema, &entry)? {
            Some(Blocker::Waiting) => {
                self.queue.release(entry.id)?;
                tracing::debug!(entry_id = entry.id, "deferred behind pending insert");
                return Ok(Some((result_for(&entry, EntryOutcome::Deferred, None), false)));
            },
            Some(Blocker::Orphaned(e)) => return self.fail(&entry, e).map(Some),
            None => {},
        }

        match self.apply(schema, &entry).await {
            Ok(remote_id) => self.complete(&entry, remote_id).map(Some),
            // Already gone remotely.
            Err(SyncError::Remote { status: 404, .. }) if entry.operation == Operation::Delete => {
                self.complete(&entry, None).map(Some)
            },
            Err(e) => self.fail(&entry, e).map(Some),
        }
    }

    /// Find a provisional identifier the remote cannot resolve yet.
    fn blocker(&self, schema: &EntitySchema, entry: &QueueEntry) -> Result<Option<Blocker>, SyncError> {
        let mut refs: Vec<(&str, String)> = Vec::new();

        if entry.operation != Operation::Insert {
            refs.push((schema.table, entry.record_id.clone()));
        }
        for fk in schema.foreign_keys {
            if let Some(id) = entry
                .payload
                .get(fk.column)
                .and_then(crate::storage::entities::id_from_value)
            {
                refs.push((fk.target, id));
            }
        }

        for (table, id) in refs {
            if !schema::is_provisional(&id) {
                continue;
            }
            if self.queue.has_outstanding_insert(table, &id)? {
                return Ok(Some(Blocker::Waiting));
            }
            return Ok(Some(Blocker::Orphaned(SyncError::NotFound(format!(
                "{table}/{id} has no pending insert"
            )))));
        }
        Ok(None)
    }

    /// Send one entry to the remote, bounded by the request timeout.
    async fn apply(&self, schema: &EntitySchema, entry: &QueueEntry) -> Result<Option<String>, SyncError> {
        let call = async {
            match entry.operation {
                Operation::Insert => self.remote.create(schema, &entry.payload).await.map(Some),
                Operation::Update => self
                    .remote
                    .update(schema, &entry.record_id, &entry.payload)
                    .await
                    .map(|()| None),
                Operation::Delete => self
                    .remote
                    .delete(schema, &entry.record_id)
                    .await
                    .map(|()| None),
            }
        };

        tokio::time::timeout(self.config.request_timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(SyncError::Connectivity(format!(
                    "request timed out after {}s",
                    self.config.request_timeout.as_secs_f64()
                )))
            })
    }

    fn complete(
        &self,
        entry: &QueueEntry,
        remote_id: Option<String>,
    ) -> Result<(ExecutionResult, bool), SyncError> {
        let applied = match (entry.operation, remote_id.as_deref()) {
            (Operation::Insert, Some(remote_id)) => self
                .queue
                .complete_insert(entry, remote_id)
                .map(|summary| {
                    tracing::info!(
                        entry_id = entry.id,
                        table = %entry.table_name,
                        local_id = %entry.record_id,
                        remote_id,
                        references = summary.reference_rows,
                        "insert confirmed"
                    );
                }),
            (Operation::Insert, None) => Err(SyncError::Parse(format!(
                "insert of {}/{} returned no id",
                entry.table_name, entry.record_id
            ))),
            (Operation::Update, _) => self.queue.complete_update(entry),
            (Operation::Delete, _) => self.queue.complete_delete(entry),
        };

        match applied {
            Ok(()) => Ok((
                result_for(entry, EntryOutcome::Completed { remote_id }, None),
                false,
            )),
            Err(e @ (SyncError::RemapConflict { .. } | SyncError::Parse(_))) => self.fail(entry, e),
            Err(e) => Err(e),
        }
    }

    fn fail(
        &self,
        entry: &QueueEntry,
        error: SyncError,
    ) -> Result<(ExecutionResult, bool), SyncError> {
        let status = self.queue.mark_failed(entry.id, &error)?;
        let lost = error.is_connectivity();

        let outcome = if status == EntryStatus::Failed {
            tracing::error!(
                entry_id = entry.id,
                table = %entry.table_name,
                operation = %entry.operation,
                error = %error,
                "entry failed"
            );
            EntryOutcome::Failed
        } else {
            tracing::warn!(
                entry_id = entry.id,
                attempt = entry.retry_count + 1,
                error = %error,
                "entry will be retried"
            );
            EntryOutcome::Retrying
        };

        Ok((result_for(entry, outcome, Some(error.to_string())), lost))
    }
}

fn result_for(entry: &QueueEntry, outcome: EntryOutcome, error: Option<String>) -> ExecutionResult {
    ExecutionResult {
        entry_id: entry.id,
        table: entry.table_name.clone(),
        operation: entry.operation,
        record_id: entry.record_id.clone(),
        outcome,
        error,
    }
}
