mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{local, product, seed_synced, FakeRemote, Reply};
use erp_sync::error::SyncError;
use erp_sync::storage::{EntityRecord, LocalStore};
use erp_sync::sync::{
    EntryOutcome, EntryStatus, Operation, PassOutcome, PassSummary, PassTrigger, SyncCommand,
    SyncResponse, SyncService,
};

async fn force(service: &SyncService) -> PassSummary {
    match service.handle(SyncCommand::ForceSync).await.unwrap() {
        SyncResponse::Pass(summary) => summary,
        other => panic!("expected a pass, got {other:?}"),
    }
}

fn queue(service: &SyncService, record: &EntityRecord, operation: Operation, priority: i32) -> i64 {
    service
        .store()
        .apply_local_mutation(record, operation, priority)
        .unwrap()
        .id
}

#[tokio::test]
async fn dispatches_by_priority_then_creation_time() {
    let remote = FakeRemote::new();
    let service = common::service(&remote, 5);

    let a = product("A");
    let b = product("B");
    let c = product("C");
    queue(&service, &a, Operation::Insert, 1);
    queue(&service, &b, Operation::Insert, 1);
    queue(&service, &c, Operation::Insert, 2);

    force(&service).await;

    let names: Vec<String> = remote
        .calls_for("products")
        .iter()
        .map(|call| call.payload["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["C", "A", "B"]);
}

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let remote = FakeRemote::new();
    remote.script(
        "products",
        Operation::Insert,
        vec![Reply::Unreachable, Reply::Unreachable, Reply::Id("P-1".to_string())],
    );
    let service = common::service(&remote, 5);
    let id = queue(&service, &product("Rice"), Operation::Insert, 0);

    let first = force(&service).await;
    assert!(first.report.connectivity_lost);
    assert!(first.download.is_none());
    assert_eq!(first.report.retried, 1);

    force(&service).await;
    let third = force(&service).await;
    assert_eq!(third.report.completed, 1);

    let entry = service.queue().get(id).unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Completed);
    assert_eq!(entry.retry_count, 2);
    assert_eq!(entry.record_id, "P-1");
    assert!(service.store().entity("products", "P-1").unwrap().unwrap().is_synced);
}

#[tokio::test]
async fn hanging_call_times_out_as_connectivity_failure() {
    let remote = FakeRemote::new();
    remote.script("products", Operation::Insert, vec![Reply::Hang]);
    let service = common::service(&remote, 5);
    let id = queue(&service, &product("Rice"), Operation::Insert, 0);

    let summary = force(&service).await;

    assert!(summary.report.connectivity_lost);
    let entry = service.queue().get(id).unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Pending);
    assert!(entry.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn retries_exhaust_after_max_plus_one_attempts() {
    let remote = FakeRemote::new();
    remote.script("products", Operation::Insert, vec![Reply::Reject(503); 4]);
    let service = common::service(&remote, 2);
    let id = queue(&service, &product("Rice"), Operation::Insert, 0);

    for _ in 0..4 {
        force(&service).await;
    }

    assert_eq!(remote.calls_for("products").len(), 3);
    let entry = service.queue().get(id).unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Failed);
    assert_eq!(entry.retry_count, 3);

    // An operator retry buys exactly one more attempt.
    service
        .handle(SyncCommand::RetryFailed { id: Some(id) })
        .await
        .unwrap();
    force(&service).await;

    assert_eq!(remote.calls_for("products").len(), 4);
    let entry = service.queue().get(id).unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Failed);
    assert_eq!(entry.retry_count, 4);
}

#[tokio::test]
async fn validation_rejection_fails_without_retry() {
    let remote = FakeRemote::new();
    remote.script("products", Operation::Update, vec![Reply::Reject(422)]);
    let service = common::service(&remote, 5);
    seed_synced(service.store(), "products", "P-1", json!({"name": "Rice"}));

    let edit = EntityRecord::with_id("products", "P-1", common::fields(json!({"name": "Rice 2kg"})));
    let id = queue(&service, &edit, Operation::Update, 0);

    let summary = force(&service).await;

    assert_eq!(summary.report.failed, 1);
    let entry = service.queue().get(id).unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Failed);
    assert_eq!(entry.retry_count, 1);
    let status = service.store().offline_status().unwrap();
    assert!(status.last_error.unwrap().contains("422"));
    assert!(!service.store().entity("products", "P-1").unwrap().unwrap().is_synced);
}

#[tokio::test]
async fn insert_chain_remaps_every_reference() {
    let remote = FakeRemote::new();
    remote.script("customers", Operation::Insert, vec![Reply::Id("C-100".to_string())]);
    remote.script("sales", Operation::Insert, vec![Reply::Id("S-200".to_string())]);
    remote.script("sale_items", Operation::Insert, vec![Reply::Id("I-300".to_string())]);
    let service = common::service(&remote, 5);
    seed_synced(service.store(), "products", "P-1", json!({"name": "Rice"}));

    let customer = local("customers", json!({"name": "Ana"}));
    let sale = local("sales", json!({"customer_id": customer.id, "total": 20}));
    let item = local(
        "sale_items",
        json!({"sale_id": sale.id, "product_id": "P-1", "quantity": 2}),
    );
    queue(&service, &customer, Operation::Insert, 0);
    queue(&service, &sale, Operation::Insert, 0);
    queue(&service, &item, Operation::Insert, 0);

    let summary = force(&service).await;
    assert_eq!(summary.report.completed, 3);

    assert_eq!(remote.calls_for("sales")[0].payload["customer_id"], json!("C-100"));
    let item_call = &remote.calls_for("sale_items")[0];
    assert_eq!(item_call.payload["sale_id"], json!("S-200"));
    assert_eq!(item_call.payload["product_id"], json!("P-1"));

    let store = service.store();
    assert!(store.entity("customers", &customer.id).unwrap().is_none());
    assert!(store.entity("customers", "C-100").unwrap().unwrap().is_synced);
    let local_sale = store.entity("sales", "S-200").unwrap().unwrap();
    assert_eq!(local_sale.record.fields["customer_id"], json!("C-100"));
    let local_item = store.entity("sale_items", "I-300").unwrap().unwrap();
    assert_eq!(local_item.record.fields["sale_id"], json!("S-200"));
    assert_eq!(store.offline_status().unwrap().pending_sync_count, 0);
}

#[tokio::test]
async fn partial_update_keeps_reference_through_remap() {
    let remote = FakeRemote::new();
    remote.script("customers", Operation::Insert, vec![Reply::Id("C-100".to_string())]);
    remote.script("sales", Operation::Insert, vec![Reply::Id("S-200".to_string())]);
    let service = common::service(&remote, 5);

    let customer = local("customers", json!({"name": "Ana"}));
    let sale = local("sales", json!({"customer_id": customer.id, "total": 20}));
    let edit = EntityRecord::with_id("sales", sale.id.clone(), common::fields(json!({"total": 25})));
    queue(&service, &customer, Operation::Insert, 0);
    queue(&service, &sale, Operation::Insert, 0);
    queue(&service, &edit, Operation::Update, 0);

    let summary = force(&service).await;
    assert_eq!(summary.report.completed, 3);

    let calls = remote.calls_for("sales");
    assert_eq!(calls[1].operation, Operation::Update);
    assert_eq!(calls[1].record_id.as_deref(), Some("S-200"));
    assert_eq!(calls[1].payload, json!({"customer_id": "C-100", "total": 25}));

    let local_sale = service.store().entity("sales", "S-200").unwrap().unwrap();
    assert_eq!(local_sale.record.fields["customer_id"], json!("C-100"));
    assert_eq!(local_sale.record.fields["total"], json!(25));
    assert!(local_sale.is_synced);
}

#[tokio::test]
async fn dependent_entry_defers_behind_failed_insert() {
    let remote = FakeRemote::new();
    remote.script(
        "customers",
        Operation::Insert,
        vec![Reply::Reject(503), Reply::Id("C-1".to_string())],
    );
    let service = common::service(&remote, 5);

    let customer = local("customers", json!({"name": "Ana"}));
    let sale = local("sales", json!({"customer_id": customer.id}));
    queue(&service, &customer, Operation::Insert, 0);
    let sale_entry = queue(&service, &sale, Operation::Insert, 0);

    let first = force(&service).await;
    assert_eq!(first.report.retried, 1);
    assert_eq!(first.report.deferred, 1);
    assert!(remote.calls_for("sales").is_empty());
    let waiting = service.queue().get(sale_entry).unwrap().unwrap();
    assert_eq!(waiting.status, EntryStatus::Pending);
    assert_eq!(waiting.retry_count, 0);

    let second = force(&service).await;
    assert_eq!(second.report.completed, 2);
    assert_eq!(remote.calls_for("sales")[0].payload["customer_id"], json!("C-1"));
}

#[tokio::test]
async fn reference_to_unknown_provisional_id_fails() {
    let remote = FakeRemote::new();
    let service = common::service(&remote, 5);
    let sale = local("sales", json!({"customer_id": "local-ghost"}));
    let id = queue(&service, &sale, Operation::Insert, 0);

    let summary = force(&service).await;

    assert_eq!(summary.report.failed, 1);
    assert!(remote.calls().is_empty());
    assert_eq!(
        service.queue().get(id).unwrap().unwrap().status,
        EntryStatus::Failed
    );
}

#[tokio::test]
async fn remap_conflict_fails_entry_and_keeps_local_row() {
    let remote = FakeRemote::new();
    remote.script("products", Operation::Insert, vec![Reply::Id("P-1".to_string())]);
    let service = common::service(&remote, 5);
    seed_synced(service.store(), "products", "P-1", json!({"name": "Existing"}));
    let rice = product("Rice");
    let id = queue(&service, &rice, Operation::Insert, 0);

    let summary = force(&service).await;

    assert_eq!(summary.report.failed, 1);
    let entry = service.queue().get(id).unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Failed);
    assert_eq!(entry.record_id, rice.id);
    assert!(entry.last_error.unwrap().contains("collides"));
    assert!(service.store().entity("products", &rice.id).unwrap().is_some());
    let existing = service.store().entity("products", "P-1").unwrap().unwrap();
    assert_eq!(existing.record.fields["name"], json!("Existing"));
}

#[tokio::test]
async fn delete_already_gone_remotely_completes() {
    let remote = FakeRemote::new();
    remote.script("products", Operation::Delete, vec![Reply::Reject(404)]);
    let service = common::service(&remote, 5);
    seed_synced(service.store(), "products", "P-1", json!({"name": "Rice"}));

    let gone = EntityRecord::with_id("products", "P-1", serde_json::Map::new());
    let id = queue(&service, &gone, Operation::Delete, 0);

    let summary = force(&service).await;

    assert!(matches!(
        summary.report.results[0].outcome,
        EntryOutcome::Completed { .. }
    ));
    assert_eq!(
        service.queue().get(id).unwrap().unwrap().status,
        EntryStatus::Completed
    );
    assert!(service.store().entity("products", "P-1").unwrap().is_none());
}

#[tokio::test]
async fn row_stays_unsynced_while_a_later_update_is_outstanding() {
    let remote = FakeRemote::new();
    remote.script(
        "products",
        Operation::Update,
        vec![Reply::Ok, Reply::Reject(422)],
    );
    let service = common::service(&remote, 5);
    seed_synced(service.store(), "products", "P-1", json!({"name": "Rice"}));

    for name in ["Rice 1kg", "Rice 2kg"] {
        let edit = EntityRecord::with_id("products", "P-1", common::fields(json!({ "name": name })));
        queue(&service, &edit, Operation::Update, 0);
    }

    force(&service).await;

    let row = service.store().entity("products", "P-1").unwrap().unwrap();
    assert!(!row.is_synced);
    assert_eq!(row.record.fields["name"], json!("Rice 2kg"));
}

#[tokio::test]
async fn download_keeps_rows_with_local_changes() {
    let remote = FakeRemote::new();
    remote.script("products", Operation::Update, vec![Reply::Unreachable]);
    let service = common::service(&remote, 5);
    seed_synced(service.store(), "products", "P-1", json!({"name": "Rice"}));
    let edit = EntityRecord::with_id("products", "P-1", common::fields(json!({"name": "Local"})));
    queue(&service, &edit, Operation::Update, 0);

    remote.set_catalog(
        "products",
        vec![
            EntityRecord::with_id("products", "P-1", common::fields(json!({"id": "P-1", "name": "Server"}))),
            EntityRecord::with_id("products", "P-2", common::fields(json!({"id": "P-2", "name": "Beans"}))),
        ],
    );

    let report = match service.handle(SyncCommand::RefreshReferenceData).await.unwrap() {
        SyncResponse::Download(report) => report,
        other => panic!("expected a download report, got {other:?}"),
    };

    let products = report.tables.iter().find(|t| t.table == "products").unwrap();
    assert_eq!(products.fetched, 2);
    assert_eq!(products.upserted, 1);
    assert_eq!(products.skipped, 1);
    let kept = service.store().entity("products", "P-1").unwrap().unwrap();
    assert_eq!(kept.record.fields["name"], json!("Local"));
    assert!(service.store().entity("products", "P-2").unwrap().unwrap().is_synced);
}

#[tokio::test]
async fn timer_pass_is_skipped_while_offline() {
    let remote = FakeRemote::new();
    let service = common::service(&remote, 5);
    queue(&service, &product("Rice"), Operation::Insert, 0);

    let outcome = service.scheduler().try_run_pass(PassTrigger::Timer).await.unwrap();
    assert!(matches!(outcome, PassOutcome::Skipped));
    assert!(remote.calls().is_empty());

    service.store().set_online(true).unwrap();
    let outcome = service.scheduler().try_run_pass(PassTrigger::Timer).await.unwrap();
    assert!(matches!(outcome, PassOutcome::Ran(_)));
    assert_eq!(service.queue().pending_count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_force_syncs_never_overlap() {
    let remote = FakeRemote::with_delay(Duration::from_millis(50));
    let service = Arc::new(common::service(&remote, 5));
    for name in ["a", "b", "c"] {
        queue(&service, &product(name), Operation::Insert, 0);
    }

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move {
            service.handle(SyncCommand::ForceSync).await.unwrap()
        }));
    }

    let mut ran = 0;
    let mut coalesced = 0;
    for task in tasks {
        match task.await.unwrap() {
            SyncResponse::Pass(_) => ran += 1,
            SyncResponse::Coalesced => coalesced += 1,
            other => panic!("unexpected response {other:?}"),
        }
    }

    assert!(ran >= 1);
    assert_eq!(ran + coalesced, 5);
    assert_eq!(remote.max_active(), 1);
    assert_eq!(service.scheduler().passes_started(), ran);
    assert_eq!(remote.calls_for("products").len(), 3);
}

#[tokio::test]
async fn reconnect_triggers_pass_before_next_tick() {
    let remote = FakeRemote::new();
    let mut config = common::config(5);
    config.sync.pass_interval_secs = 3600;
    config.sync.probe_interval_secs = 1;
    let probe = common::SwitchProbe::new(true);
    let service = common::service_with(config, common::memory_store(5), &remote, probe);
    queue(&service, &product("Rice"), Operation::Insert, 0);

    let handle = service.start();

    let mut drained = false;
    for _ in 0..100 {
        if service.queue().pending_count().unwrap() == 0 {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.shutdown().await;

    assert!(drained, "reconnect did not trigger a pass");
    assert!(service.store().offline_status().unwrap().is_online);
    assert_eq!(service.scheduler().passes_started(), 1);
}

#[tokio::test]
async fn interrupted_remap_leaves_references_all_old_then_all_new() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("erp.db");
    let remote = FakeRemote::new();
    remote.script(
        "customers",
        Operation::Insert,
        vec![Reply::Id("C-1".to_string()), Reply::Id("C-1".to_string())],
    );

    let customer = local("customers", json!({"name": "Ana"}));
    let sale = local("sales", json!({"customer_id": customer.id}));
    let sale_entry;
    {
        let store = Arc::new(LocalStore::open(&path, 5).unwrap());
        store.initialize().unwrap();
        let service = common::service_with(
            common::config(5),
            Arc::clone(&store),
            &remote,
            common::SwitchProbe::new(true),
        );
        queue(&service, &customer, Operation::Insert, 0);
        sale_entry = queue(&service, &sale, Operation::Insert, 0);

        // Fail the remap after the customer row has already been rewritten.
        let raw = rusqlite::Connection::open(&path).unwrap();
        raw.execute_batch(
            "CREATE TRIGGER crash_mid_remap BEFORE UPDATE OF customer_id ON sales
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();
        drop(raw);

        let err = service.handle(SyncCommand::ForceSync).await.unwrap_err();
        assert!(matches!(err, SyncError::Database(_)));
        let status = store.offline_status().unwrap();
        assert!(status.last_error.unwrap().contains("disk full"));
    }

    let store = Arc::new(LocalStore::open(&path, 5).unwrap());
    store.initialize().unwrap();

    assert!(store.entity("customers", &customer.id).unwrap().is_some());
    assert!(store.entity("customers", "C-1").unwrap().is_none());
    let old_sale = store.entity("sales", &sale.id).unwrap().unwrap();
    assert_eq!(old_sale.record.fields["customer_id"], json!(customer.id));

    let service = common::service_with(
        common::config(5),
        Arc::clone(&store),
        &remote,
        common::SwitchProbe::new(true),
    );
    let queued_sale = service.queue().get(sale_entry).unwrap().unwrap();
    assert_eq!(queued_sale.payload["customer_id"], json!(customer.id));
    assert_eq!(service.queue().stats().unwrap().processing, 0);

    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute_batch("DROP TRIGGER crash_mid_remap;").unwrap();
    drop(raw);

    let summary = force(&service).await;
    assert_eq!(summary.report.completed, 2);

    assert!(store.entity("customers", &customer.id).unwrap().is_none());
    assert!(store.entity("customers", "C-1").unwrap().is_some());
    let sales = remote.calls_for("sales");
    assert_eq!(sales.len(), 1);
    assert_eq!(sales[0].payload["customer_id"], json!("C-1"));
}

#[tokio::test]
async fn out_of_range_retention_is_a_config_error() {
    let remote = FakeRemote::new();
    let mut config = common::config(5);
    config.sync.completed_retention_hours = i64::MAX;

    let result = SyncService::new(
        config,
        common::memory_store(5),
        Arc::clone(&remote) as Arc<dyn erp_sync::sync::RemoteApi>,
        common::SwitchProbe::new(true),
    );
    assert!(matches!(result, Err(SyncError::Config(_))));

    let service = common::service(&remote, 5);
    let older_than = chrono::TimeDelta::try_hours(10_000_000_000).unwrap();
    let err = service
        .handle(SyncCommand::PurgeCompleted { older_than })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

#[tokio::test]
async fn failed_reference_refresh_is_recorded() {
    let remote = FakeRemote::new();
    remote.break_catalog("customers");
    let service = common::service(&remote, 5);

    let summary = force(&service).await;

    let download = summary.download.unwrap();
    assert!(!download.is_complete());
    assert_eq!(download.failures[0].table, "customers");
    let status = service.store().offline_status().unwrap();
    assert!(status.last_sync_at.is_some());
    assert!(status.last_error.unwrap().contains("download of customers failed"));
}
