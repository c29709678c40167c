//! Shared fixtures for engine tests: a scripted in-process remote and a
//! switchable probe.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use erp_sync::config::Config;
use erp_sync::error::SyncError;
use erp_sync::storage::schema::EntitySchema;
use erp_sync::storage::{EntityRecord, LocalStore};
use erp_sync::sync::{Operation, Probe, RemoteApi, SyncService};

/// Scripted answer for one remote call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Success; for inserts, the id to assign
    Id(String),
    Ok,
    /// HTTP rejection with this status
    Reject(u16),
    /// Transport failure
    Unreachable,
    /// Never answers
    Hang,
}

/// One call the engine made.
#[derive(Debug, Clone)]
pub struct Call {
    pub table: String,
    pub operation: Operation,
    pub record_id: Option<String>,
    pub payload: Value,
}

/// In-process stand-in for the remote ERP authority.
#[derive(Default)]
pub struct FakeRemote {
    script: Mutex<HashMap<(String, Operation), VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
    catalog: Mutex<HashMap<String, Vec<EntityRecord>>>,
    broken_catalogs: Mutex<HashSet<String>>,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    next_id: AtomicU64,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Queue replies for `(table, operation)`; unscripted calls succeed.
    pub fn script(&self, table: &str, operation: Operation, replies: Vec<Reply>) {
        self.script
            .lock()
            .unwrap()
            .entry((table.to_string(), operation))
            .or_default()
            .extend(replies);
    }

    /// Records returned by `fetch_all` for a table.
    pub fn set_catalog(&self, table: &str, records: Vec<EntityRecord>) {
        self.catalog.lock().unwrap().insert(table.to_string(), records);
    }

    /// Make `fetch_all` for a table answer with a server error.
    pub fn break_catalog(&self, table: &str) {
        self.broken_catalogs.lock().unwrap().insert(table.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, table: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.table == table)
            .collect()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn answer(
        &self,
        schema: &EntitySchema,
        operation: Operation,
        record_id: Option<&str>,
        payload: &Value,
    ) -> Result<Option<String>, SyncError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        self.calls.lock().unwrap().push(Call {
            table: schema.table.to_string(),
            operation,
            record_id: record_id.map(str::to_string),
            payload: payload.clone(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = self
            .script
            .lock()
            .unwrap()
            .get_mut(&(schema.table.to_string(), operation))
            .and_then(VecDeque::pop_front);

        match reply {
            Some(Reply::Id(id)) => Ok(Some(id)),
            Some(Reply::Ok) => Ok(None),
            Some(Reply::Reject(status)) => Err(SyncError::Remote {
                status,
                message: format!("rejected with {status}"),
            }),
            Some(Reply::Unreachable) => Err(SyncError::Connectivity("connection refused".to_string())),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            },
            None if operation == Operation::Insert => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Some(format!("R-{n}")))
            },
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn create(&self, schema: &EntitySchema, payload: &Value) -> Result<String, SyncError> {
        self.answer(schema, Operation::Insert, None, payload)
            .await?
            .ok_or_else(|| SyncError::Parse("scripted insert without id".to_string()))
    }

    async fn update(&self, schema: &EntitySchema, id: &str, payload: &Value) -> Result<(), SyncError> {
        self.answer(schema, Operation::Update, Some(id), payload)
            .await
            .map(|_| ())
    }

    async fn delete(&self, schema: &EntitySchema, id: &str) -> Result<(), SyncError> {
        self.answer(schema, Operation::Delete, Some(id), &Value::Null)
            .await
            .map(|_| ())
    }

    async fn fetch_all(&self, schema: &EntitySchema) -> Result<Vec<EntityRecord>, SyncError> {
        if self.broken_catalogs.lock().unwrap().contains(schema.table) {
            return Err(SyncError::Remote {
                status: 500,
                message: "catalog unavailable".to_string(),
            });
        }
        Ok(self
            .catalog
            .lock()
            .unwrap()
            .get(schema.table)
            .cloned()
            .unwrap_or_default())
    }
}

/// Probe whose answer the test flips.
pub struct SwitchProbe {
    online: AtomicBool,
}

impl SwitchProbe {
    pub fn new(online: bool) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(online),
        })
    }

    pub fn set(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Probe for SwitchProbe {
    async fn probe(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

pub fn config(max_retries: u32) -> Config {
    let mut config = Config::default();
    config.sync.max_retries = max_retries;
    config.remote.request_timeout_secs = 1;
    config
}

pub fn memory_store(max_retries: u32) -> Arc<LocalStore> {
    let store = LocalStore::open_in_memory(max_retries).unwrap();
    store.initialize().unwrap();
    Arc::new(store)
}

/// A service over an in-memory store, probe reporting online.
pub fn service(remote: &Arc<FakeRemote>, max_retries: u32) -> SyncService {
    service_with(config(max_retries), memory_store(max_retries), remote, SwitchProbe::new(true))
}

pub fn service_with(
    config: Config,
    store: Arc<LocalStore>,
    remote: &Arc<FakeRemote>,
    probe: Arc<SwitchProbe>,
) -> SyncService {
    let remote: Arc<dyn RemoteApi> = Arc::clone(remote) as Arc<dyn RemoteApi>;
    SyncService::new(config, store, remote, probe).unwrap()
}

pub fn fields(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().cloned().unwrap()
}

pub fn local(table: &str, value: Value) -> EntityRecord {
    EntityRecord::new_local(table, fields(value))
}

/// Seed a row as if it had been downloaded from the remote.
pub fn seed_synced(store: &LocalStore, table: &str, id: &str, value: Value) {
    let record = EntityRecord::with_id(table, id, fields(value));
    store.upsert_remote(table, &[record]).unwrap();
}

pub fn product(name: &str) -> EntityRecord {
    local("products", json!({ "name": name, "price": 10 }))
}
