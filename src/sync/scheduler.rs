//! Sync scheduler.
//!
//! The only driver of sync passes. A single loop waits on the pass timer,
//! a wake signal (reconnect) or shutdown. Forced passes run from the caller's
//! task. An atomic in-progress flag keeps passes from overlapping; requests
//! that arrive during a pass are dropped, not queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::time::{self, Instant, MissedTickBehavior};

use super::downloader::{BulkDownloader, DownloadReport};
use super::executor::{PassReport, SyncExecutor};
use super::queue::ChangeQueue;
use crate::error::SyncError;
use crate::storage::LocalStore;

/// What started a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassTrigger {
    /// Periodic tick; skipped while offline
    Timer,
    /// Wake signal, e.g. reconnect
    Signal,
    /// Explicit request from the control surface
    Forced,
}

/// A pass that ran, with the reference refresh that followed it.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub trigger: PassTrigger,
    pub report: PassReport,
    /// `None` when the pass lost connectivity.
    pub download: Option<DownloadReport>,
    pub purged: usize,
}

/// Result of asking for a pass.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PassOutcome {
    Ran(PassSummary),
    /// Timer tick while offline
    Skipped,
    /// Another pass was already running
    Coalesced,
}

/// Clears the in-progress flag when a pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Serializes sync passes.
pub struct SyncScheduler {
    store: Arc<LocalStore>,
    queue: ChangeQueue,
    executor: SyncExecutor,
    downloader: BulkDownloader,
    retention: chrono::Duration,
    in_progress: AtomicBool,
    wake: Notify,
    passes_started: AtomicU64,
}

impl SyncScheduler {
    #[must_use]
    pub fn new(
        queue: ChangeQueue,
        executor: SyncExecutor,
        downloader: BulkDownloader,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            store: Arc::clone(queue.store()),
            queue,
            executor,
            downloader,
            retention,
            in_progress: AtomicBool::new(false),
            wake: Notify::new(),
            passes_started: AtomicU64::new(0),
        }
    }

    /// Whether a pass is running right now.
    #[must_use]
    pub fn sync_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Passes started since construction.
    #[must_use]
    pub fn passes_started(&self) -> u64 {
        self.passes_started.load(Ordering::Acquire)
    }

    /// The downloader, for on-demand refreshes.
    #[must_use]
    pub const fn downloader(&self) -> &BulkDownloader {
        &self.downloader
    }

    /// Ask the loop for an out-of-cycle pass. Dropped if a pass is running.
    pub fn request_pass(&self) {
        if self.sync_in_progress() {
            tracing::debug!("pass already running, wake request dropped");
            return;
        }
        self.wake.notify_one();
    }

    /// Run a pass unless one is already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass hit a local store failure. The error is
    /// also recorded in the status row when possible.
    pub async fn try_run_pass(&self, trigger: PassTrigger) -> Result<PassOutcome, SyncError> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(?trigger, "pass already running, request coalesced");
            return Ok(PassOutcome::Coalesced);
        }
        let _guard = PassGuard(&self.in_progress);

        if trigger == PassTrigger::Timer && !self.store.offline_status()?.is_online {
            tracing::debug!("offline, skipping timer pass");
            return Ok(PassOutcome::Skipped);
        }

        self.passes_started.fetch_add(1, Ordering::AcqRel);
        tracing::info!(?trigger, "starting sync pass");

        match self.run_pass(trigger).await {
            Ok(summary) => Ok(PassOutcome::Ran(summary)),
            Err(e) => {
                tracing::error!(error = %e, "sync pass aborted");
                if let Err(record) = self.store.record_error(&e.to_string()) {
                    tracing::error!(error = %record, "failed to record pass error");
                }
                Err(e)
            },
        }
    }

    async fn run_pass(&self, trigger: PassTrigger) -> Result<PassSummary, SyncError> {
        let report = self.executor.run_pass().await?;

        let download = if report.connectivity_lost {
            None
        } else {
            self.store.record_sync_completed(report.is_clean())?;
            let download = self.downloader.refresh().await?;
            if !download.is_complete() {
                let message = download
                    .failures
                    .iter()
                    .map(|failure| format!("download of {} failed: {}", failure.table, failure.error))
                    .collect::<Vec<_>>()
                    .join("; ");
                self.store.record_error(&message)?;
            }
            Some(download)
        };

        let purged = self.queue.purge_completed(self.retention)?;
        if purged > 0 {
            tracing::debug!(purged, "purged completed entries");
        }

        Ok(PassSummary {
            trigger,
            report,
            download,
            purged,
        })
    }

    /// Drive passes until `shutdown` flips to `true`.
    ///
    /// A pass in flight when shutdown arrives runs to completion first.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let trigger = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => PassTrigger::Timer,
                () = self.wake.notified() => PassTrigger::Signal,
            };

            match self.try_run_pass(trigger).await {
                Ok(PassOutcome::Ran(summary)) => tracing::debug!(
                    total = summary.report.total(),
                    "scheduled pass done"
                ),
                Ok(_) => {},
                Err(e) => tracing::error!(error = %e, "scheduled pass failed"),
            }
        }

        tracing::debug!("sync scheduler stopped");
    }
}
