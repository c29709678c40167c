//! The sync service: the typed control surface over the engine.
//!
//! [`SyncService`] is constructed once per process from a [`Config`] and
//! owns every engine component. Callers drive it with [`SyncCommand`]s and
//! get a [`SyncResponse`] or a [`SyncError`] back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::downloader::{BulkDownloader, DownloadReport};
use super::entry::{EntryStatus, Operation, QueueEntry};
use super::executor::{ExecutorConfig, SyncExecutor};
use super::monitor::{ConnectivityMonitor, HttpProbe, Probe, Transition};
use super::queue::{ChangeQueue, QueueStats};
use super::remote::{HttpRemote, RemoteApi};
use super::scheduler::{PassOutcome, PassSummary, PassTrigger, SyncScheduler};
use crate::config::Config;
use crate::error::SyncError;
use crate::storage::{EntityRecord, LocalStore};

/// A request to the engine.
#[derive(Debug, Clone)]
pub enum SyncCommand {
    GetStatus,
    /// Run a pass now, whatever the connectivity flag says
    ForceSync,
    PendingCount,
    RefreshReferenceData,
    ListEntries {
        status: Option<EntryStatus>,
        limit: usize,
    },
    /// Retry one failed entry, or all of them
    RetryFailed { id: Option<i64> },
    /// Delete completed entries older than the given age
    PurgeCompleted { older_than: chrono::Duration },
    ApplyLocalMutation {
        entity: EntityRecord,
        operation: Operation,
        priority: i32,
    },
}

/// The engine's answer to a [`SyncCommand`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SyncResponse {
    Status(StatusReport),
    Pass(PassSummary),
    /// A pass was already running; this request was dropped
    Coalesced,
    Skipped,
    PendingCount(i64),
    Download(DownloadReport),
    Entries(Vec<QueueEntry>),
    Retried(usize),
    Purged(usize),
    Queued(QueueEntry),
}

/// Snapshot for the status query.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub is_online: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_sync_count: i64,
    pub sync_in_progress: bool,
    pub last_error: Option<String>,
    pub queue: QueueStats,
}

/// Handle to the background loops started by [`SyncService::start`].
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Signal both loops and wait for them. A pass in flight finishes first.
    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            tracing::debug!("engine loops already stopped");
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "engine task panicked");
            }
        }
        tracing::info!("sync engine stopped");
    }
}

/// Offline-first sync engine.
pub struct SyncService {
    config: Config,
    store: Arc<LocalStore>,
    queue: ChangeQueue,
    scheduler: Arc<SyncScheduler>,
    monitor: Arc<ConnectivityMonitor>,
}

impl SyncService {
    /// Assemble the engine over an initialized store.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` if the retention window is out of range.
    pub fn new(
        config: Config,
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteApi>,
        probe: Arc<dyn Probe>,
    ) -> Result<Self, SyncError> {
        let retention = config.sync.retention()?;
        let queue = ChangeQueue::new(Arc::clone(&store));
        let executor = SyncExecutor::new(
            queue.clone(),
            Arc::clone(&remote),
            ExecutorConfig {
                batch_size: config.sync.batch_size,
                request_timeout: config.remote.request_timeout(),
                stop_on_connectivity_error: true,
            },
        );
        let downloader = BulkDownloader::new(
            Arc::clone(&store),
            remote,
            config.sync.reference_tables.clone(),
            config.remote.request_timeout(),
        );
        let scheduler = Arc::new(SyncScheduler::new(
            queue.clone(),
            executor,
            downloader,
            retention,
        ));
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::clone(&store),
            probe,
            config.remote.probe_timeout(),
        ));

        Ok(Self {
            config,
            store,
            queue,
            scheduler,
            monitor,
        })
    }

    /// Validate the config, open and initialize the store, and wire the
    /// HTTP remote and probe.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration or if the store cannot be
    /// opened or migrated. Startup must stop in that case.
    pub fn from_config(config: Config) -> Result<Self, SyncError> {
        config.validate()?;

        let path = config.database_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = LocalStore::open(&path, config.sync.max_retries)?;
        let version = store.initialize()?;
        tracing::debug!(path = %path.display(), version, "local store ready");

        let remote = HttpRemote::new(&config.remote.base_url, config.remote.request_timeout())?;
        let probe = HttpProbe::new(
            &config.remote.base_url,
            &config.remote.probe_path,
            config.remote.probe_timeout(),
        )?;

        Self::new(config, Arc::new(store), Arc::new(remote), Arc::new(probe))
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    #[must_use]
    pub const fn queue(&self) -> &ChangeQueue {
        &self.queue
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    /// Probe the remote once and record the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the status row cannot be updated.
    pub async fn check_connectivity(&self) -> Result<Transition, SyncError> {
        self.monitor.check_once().await
    }

    /// Execute a command.
    ///
    /// # Errors
    ///
    /// Returns the command's failure; per-entry remote failures are not
    /// errors and show up in the pass report instead.
    pub async fn handle(&self, command: SyncCommand) -> Result<SyncResponse, SyncError> {
        match command {
            SyncCommand::GetStatus => self.status().map(SyncResponse::Status),
            SyncCommand::ForceSync => {
                match self.scheduler.try_run_pass(PassTrigger::Forced).await? {
                    PassOutcome::Ran(summary) => Ok(SyncResponse::Pass(summary)),
                    PassOutcome::Coalesced => Ok(SyncResponse::Coalesced),
                    PassOutcome::Skipped => Ok(SyncResponse::Skipped),
                }
            },
            SyncCommand::PendingCount => self.queue.pending_count().map(SyncResponse::PendingCount),
            SyncCommand::RefreshReferenceData => self
                .scheduler
                .downloader()
                .refresh()
                .await
                .map(SyncResponse::Download),
            SyncCommand::ListEntries { status, limit } => {
                self.queue.list(status, limit).map(SyncResponse::Entries)
            },
            SyncCommand::RetryFailed { id: Some(id) } => {
                self.queue.retry_failed(id)?;
                tracing::info!(entry_id = id, "failed entry requeued");
                Ok(SyncResponse::Retried(1))
            },
            SyncCommand::RetryFailed { id: None } => {
                let count = self.queue.retry_all_failed()?;
                tracing::info!(count, "failed entries requeued");
                Ok(SyncResponse::Retried(count))
            },
            SyncCommand::PurgeCompleted { older_than } => {
                self.queue.purge_completed(older_than).map(SyncResponse::Purged)
            },
            SyncCommand::ApplyLocalMutation {
                entity,
                operation,
                priority,
            } => self
                .store
                .apply_local_mutation(&entity, operation, priority)
                .map(SyncResponse::Queued),
        }
    }

    fn status(&self) -> Result<StatusReport, SyncError> {
        let status = self.store.offline_status()?;
        Ok(StatusReport {
            is_online: status.is_online,
            last_sync_at: status.last_sync_at,
            pending_sync_count: status.pending_sync_count,
            sync_in_progress: self.scheduler.sync_in_progress(),
            last_error: status.last_error,
            queue: self.queue.stats()?,
        })
    }

    /// Spawn the scheduler loop and the connectivity loop.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(&self) -> EngineHandle {
        let (shutdown, scheduler_rx) = watch::channel(false);
        let monitor_rx = shutdown.subscribe();

        let scheduler = Arc::clone(&self.scheduler);
        let pass_interval = self.config.sync.pass_interval();
        let scheduler_task = tokio::spawn(async move {
            scheduler.run(pass_interval, scheduler_rx).await;
        });

        let monitor = Arc::clone(&self.monitor);
        let scheduler = Arc::clone(&self.scheduler);
        let probe_interval = self.config.sync.probe_interval();
        let monitor_task = tokio::spawn(async move {
            monitor.run(scheduler, probe_interval, monitor_rx).await;
        });

        tracing::info!(
            base_url = %self.config.remote.base_url,
            probe_interval_secs = self.config.sync.probe_interval_secs,
            pass_interval_secs = self.config.sync.pass_interval_secs,
            "sync engine started"
        );

        EngineHandle {
            shutdown,
            tasks: vec![scheduler_task, monitor_task],
        }
    }
}
