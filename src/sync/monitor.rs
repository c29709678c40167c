//! Connectivity monitor.
//!
//! Probes the remote authority on an interval and records the result in the
//! offline status row. A transition from offline to online wakes the
//! scheduler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use super::scheduler::SyncScheduler;
use crate::error::SyncError;
use crate::storage::LocalStore;

/// Reachability check against the remote authority.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Probe: Send + Sync {
    /// Whether the remote answered.
    async fn probe(&self) -> bool;
}

/// Probe that issues a `GET` against a health path.
///
/// Any HTTP answer below 500 counts as reachable.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    /// Create a probe for `{base_url}{path}`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` if the HTTP client cannot be built.
    pub fn new(base_url: &str, path: &str, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build probe client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}{path}", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => response.status().as_u16() < 500,
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "probe failed");
                false
            },
        }
    }
}

/// Result of one probe compared with the stored flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    /// Offline to online
    Reconnected,
    /// Online to offline
    Disconnected,
}

/// Keeps `offline_status.is_online` current.
pub struct ConnectivityMonitor {
    store: Arc<LocalStore>,
    probe: Arc<dyn Probe>,
    probe_timeout: Duration,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(store: Arc<LocalStore>, probe: Arc<dyn Probe>, probe_timeout: Duration) -> Self {
        Self {
            store,
            probe,
            probe_timeout,
        }
    }

    /// Probe once and store the result. A probe that outlives the timeout
    /// counts as offline.
    ///
    /// # Errors
    ///
    /// Returns an error if the status row cannot be updated.
    pub async fn check_once(&self) -> Result<Transition, SyncError> {
        let online = time::timeout(self.probe_timeout, self.probe.probe())
            .await
            .unwrap_or(false);

        let was_online = self.store.set_online(online)?;

        let transition = match (was_online, online) {
            (false, true) => Transition::Reconnected,
            (true, false) => Transition::Disconnected,
            _ => Transition::Unchanged,
        };

        match transition {
            Transition::Reconnected => tracing::info!("remote authority reachable"),
            Transition::Disconnected => tracing::warn!("remote authority unreachable"),
            Transition::Unchanged => {},
        }
        Ok(transition)
    }

    /// Probe every `interval` until `shutdown` flips to `true`.
    pub async fn run(
        &self,
        scheduler: Arc<SyncScheduler>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.check_once().await {
                        Ok(Transition::Reconnected) => scheduler.request_pass(),
                        Ok(_) => {},
                        Err(e) => tracing::error!(error = %e, "failed to record connectivity"),
                    }
                }
            }
        }

        tracing::debug!("connectivity monitor stopped");
    }
}
