//! erp-sync - offline-first synchronization for an ERP desktop shell
//!
//! This crate keeps a local `SQLite` store usable without connectivity,
//! queues every local mutation, and reconciles with the remote ERP authority
//! once it becomes reachable, remapping provisional identifiers to the ones
//! the remote assigns.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod output;
pub mod storage;
pub mod sync;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use error::SyncError;
pub use storage::{EntityRecord, LocalStore};
pub use sync::{SyncCommand, SyncResponse, SyncService};
