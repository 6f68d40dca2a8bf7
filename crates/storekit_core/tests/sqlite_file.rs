mod common;

use common::{catalog, space, AuditEvent, Order, AUDIT, SALES};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use storekit_core::{BindingConfig, Entity, Router, RouterError, StoreError};

fn file_router(db_path: &Path) -> Router {
    let primary = db_path.to_str().expect("utf-8 path").to_string();
    let mut router = Router::new();
    router
        .bind(
            BindingConfig::sqlite(primary.clone())
                .marker(SALES)
                .replica(format!("sqlite:{primary}"))
                .create_schema_if_missing(true),
            &catalog(),
        )
        .expect("bind sales");
    router
}

#[test]
fn committed_writes_are_visible_through_replica_connection() {
    let dir = tempfile::tempdir().expect("temp dir");
    let router = file_router(&dir.path().join("sales.db"));
    let binding = router.registry().resolve_kind(Order::KIND).expect("binding");

    let tx = router.begin_transaction::<Order>().expect("begin");
    let first = Order::new("margaret", 1200);
    let second = Order::new("frances", 800);
    router.add(&first).expect("add first");
    router.add(&second).expect("add second");

    let replica = &binding.replica_handles().expect("replicas")[0];
    assert!(replica.connection_string().starts_with("sqlite:"));
    assert!(replica
        .find(Order::KIND.name(), &first.record.id)
        .expect("replica read during tx")
        .is_none());
    assert!(router
        .find_by_key::<Order>(first.record.id.as_str())
        .expect("primary read during tx")
        .is_some());

    assert_eq!(router.commit_transaction(&tx).expect("commit"), 2);

    let orders = router.table::<Order>().expect("table");
    assert!(orders.is_backed_by(replica));
    let mut customers: Vec<String> = orders
        .all()
        .expect("all orders")
        .into_iter()
        .map(|order| order.customer)
        .collect();
    customers.sort();
    assert_eq!(customers, ["frances", "margaret"]);
}

#[test]
fn raw_commands_run_on_primary_with_bound_params() {
    let dir = tempfile::tempdir().expect("temp dir");
    let router = file_router(&dir.path().join("raw.db"));
    let order = Order::new("dennis", 300);
    router.add(&order).expect("add");

    let removed = router
        .execute_raw::<Order, _>(
            r#"DELETE FROM "Order" WHERE key = ?1"#,
            [json!(order.record.id)],
        )
        .expect("delete");
    assert_eq!(removed, 1);

    let untouched = router
        .execute_raw::<Order, _>(r#"DELETE FROM "Order" WHERE key = ?1"#, vec![json!("gone")])
        .expect("delete missing");
    assert_eq!(untouched, 0);
    assert!(router
        .find_by_key::<Order>(order.record.id.as_str())
        .expect("find")
        .is_none());
}

#[test]
fn raw_commands_are_rejected_by_document_bindings() {
    let mut router = Router::new();
    router
        .bind(
            BindingConfig::document(space("raw-doc", "audit")).marker(AUDIT),
            &catalog(),
        )
        .expect("bind audit");

    let err = router
        .execute_raw::<AuditEvent, _>("DELETE EVERYTHING", Vec::new())
        .expect_err("document raw command must fail");
    assert!(matches!(
        err,
        RouterError::Store(StoreError::Unsupported { .. })
    ));
}

#[test]
fn newer_schema_version_fails_bind_and_leaves_registry_unchanged() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("future.db");
    let conn = rusqlite::Connection::open(&db_path).expect("open");
    conn.execute_batch("PRAGMA user_version = 99;")
        .expect("set version");
    drop(conn);

    let mut router = Router::new();
    let err = router
        .bind(
            BindingConfig::sqlite(db_path.to_str().expect("utf-8 path"))
                .marker(SALES)
                .create_schema_if_missing(true),
            &catalog(),
        )
        .err()
        .expect("future schema must fail");
    assert!(matches!(
        err,
        RouterError::Store(StoreError::UnsupportedSchemaVersion { db_version: 99, .. })
    ));
    assert!(router.registry().is_empty());
}

#[test]
fn unreachable_database_fails_on_first_use_not_at_bind() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("no-such-dir").join("sales.db");

    let mut router = Router::new();
    router
        .bind(
            BindingConfig::sqlite(missing.to_str().expect("utf-8 path")).marker(SALES),
            &catalog(),
        )
        .expect("lazy bind succeeds");

    let err = router
        .route_for_write::<Order>()
        .err()
        .expect("open must fail");
    assert!(matches!(err, RouterError::HandleConstructionFailed { .. }));

    let binding = router.registry().resolve_kind(Order::KIND).expect("binding");
    assert!(binding.built_primary().is_none());
}

#[test]
fn raw_begin_is_honored_by_routing_and_commit() {
    let dir = tempfile::tempdir().expect("temp dir");
    let router = file_router(&dir.path().join("raw-tx.db"));
    let primary = router.route_for_write::<Order>().expect("primary");

    router
        .execute_raw::<Order, _>("BEGIN IMMEDIATE;", Vec::new())
        .expect("raw begin");
    assert!(primary.in_transaction());
    let read = router.route_for_read::<Order>().expect("read route");
    assert!(Arc::ptr_eq(&read, &primary));

    let order = Order::new("alan", 64);
    router.add(&order).expect("add");
    assert_eq!(router.commit().expect("commit raw transaction"), 1);

    assert!(!primary.in_transaction());
    let read = router.route_for_read::<Order>().expect("read after commit");
    assert!(!Arc::ptr_eq(&read, &primary));
    assert!(read
        .find(Order::KIND.name(), &order.record.id)
        .expect("replica read")
        .is_some());
}
