mod common;

use common::{catalog, space, AuditEvent, Order};
use serde_json::json;
use storekit_core::{ConfigError, Entity, Router, RouterConfig, RouterError};

#[test]
fn router_from_config_file_routes_both_backends() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("sales.db");
    let config_path = dir.path().join("router.json");
    let audit_space = space("config", "audit");
    let config = json!({
        "bindings": [
            {
                "backend": "sqlite",
                "marker": "sales",
                "primary": db_path.to_str().expect("utf-8 path"),
                "create_schema_if_missing": true
            },
            {
                "backend": "document",
                "entities": ["AuditEvent"],
                "primary": audit_space.clone(),
                "replicas": [audit_space]
            }
        ]
    });
    std::fs::write(&config_path, config.to_string()).expect("write config");

    let config = RouterConfig::load(&config_path).expect("load config");
    let router = Router::from_config(&config, &catalog()).expect("router");
    assert_eq!(router.registry().len(), 2);

    let order = Order::new("barbara", 75);
    router.add(&order).expect("add order");
    let event = AuditEvent {
        stream: "orders".to_string(),
        sequence: 1,
        action: "created".to_string(),
    };
    router.add(&event).expect("add event");

    assert!(router
        .find_by_key::<Order>(order.record.id.as_str())
        .expect("find order")
        .is_some());
    let loaded = router
        .find_by_key::<AuditEvent>(event.key())
        .expect("find event")
        .expect("event replicated through shared space");
    assert_eq!(loaded, event);
}

#[test]
fn unknown_marker_in_config_fails_router_construction() {
    let config = RouterConfig::from_json_str(
        r#"{"bindings": [{"backend": "sqlite", "marker": "billing", "primary": ":memory:"}]}"#,
    )
    .expect("syntactically valid");

    let err = Router::from_config(&config, &catalog())
        .err()
        .expect("unknown marker must fail");
    assert!(matches!(
        err,
        RouterError::Config(ConfigError::UnknownMarker(ref name)) if name == "billing"
    ));
}

#[test]
fn missing_config_file_reports_its_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.json");
    let err = RouterConfig::load(&path).expect_err("missing file must fail");
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.json"));
}
