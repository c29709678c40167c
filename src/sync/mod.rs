//! Offline-first synchronization with the remote ERP authority.
//!
//! Local mutations are queued alongside the entity write; passes drain the
//! queue against the remote and reconcile provisional identifiers.

pub mod downloader;
pub mod entry;
pub mod executor;
pub mod monitor;
pub mod queue;
pub mod remote;
pub mod scheduler;
pub mod service;

pub use downloader::{BulkDownloader, DownloadReport, TableFailure, TableRefresh};
pub use entry::{EntryStatus, NewEntry, Operation, QueueEntry};
pub use executor::{EntryOutcome, ExecutionResult, ExecutorConfig, PassReport, SyncExecutor};
pub use monitor::{ConnectivityMonitor, HttpProbe, Probe, Transition};
pub use queue::{ChangeQueue, QueueStats};
pub use remote::{HttpRemote, RemoteApi};
pub use scheduler::{PassOutcome, PassSummary, PassTrigger, SyncScheduler};
pub use service::{EngineHandle, StatusReport, SyncCommand, SyncResponse, SyncService};
