//! Config store and resolver behavior through the registry facade.

use lokstra::prelude::*;
use serde_json::json;
use serial_test::serial;

#[test]
#[serial]
fn env_overrides_default_in_expressions() {
    std::env::set_var("PORT", "9090");
    let registry = Registry::new();
    registry.set_config("port", json!("${PORT:8080}"));
    registry.set_config("url", json!("http://localhost:${@CFG:port}"));
    registry.resolve_configs().expect("resolve");

    assert_eq!(
        registry.get_config("url"),
        Some(json!("http://localhost:9090"))
    );
    std::env::remove_var("PORT");
}

#[test]
#[serial]
fn default_used_when_env_unset() {
    std::env::remove_var("PORT");
    let registry = Registry::new();
    registry.set_config("port", json!("${PORT:8080}"));
    registry.set_config("url", json!("http://localhost:${@CFG:port}"));
    registry.resolve_configs().expect("resolve");

    assert_eq!(
        registry.get_config("url"),
        Some(json!("http://localhost:8080"))
    );
}

#[test]
fn nested_write_cleans_stale_leaves() {
    let registry = Registry::new();
    registry.set_config("db", json!({ "host": "a", "port": 5432 }));
    registry.set_config("db", json!({ "host": "b" }));

    assert_eq!(registry.get_config("db.host"), Some(json!("b")));
    assert_eq!(registry.get_config("db.port"), None);
    assert_eq!(registry.get_config("db"), Some(json!({ "host": "b" })));
}

#[test]
fn reads_are_deterministic_for_a_write_sequence() {
    let write = |registry: &Registry| {
        registry.set_config("app", json!({ "name": "svc", "port": 1 }));
        registry.set_config("app.port", json!(2));
        registry.set_config("app", json!({ "name": "svc2" }));
    };
    let a = Registry::new();
    let b = Registry::new();
    write(&a);
    write(&b);

    for key in ["app", "app.name", "app.port"] {
        assert_eq!(a.get_config(key), b.get_config(key), "key {key}");
    }
    assert_eq!(a.get_config("app.port"), None);
}

#[test]
fn struct_binding_reads_subtrees() {
    #[derive(serde::Deserialize)]
    struct PoolConfig {
        min: u32,
        max: u32,
    }

    let registry = Registry::new();
    registry.set_config("db.pool", json!({ "min": 2, "max": 10 }));
    let pool: PoolConfig = registry.get_config_as("db.pool").expect("bind");
    assert_eq!(pool.min, 2);
    assert_eq!(pool.max, 10);
}

#[test]
fn simple_resolve_reads_store_values() {
    let registry = Registry::new();
    registry.set_config("service.port", json!(9001));
    let resolved = registry
        .simple_resolve("127.0.0.1:${service.port}")
        .expect("resolve");
    assert_eq!(resolved, "127.0.0.1:9001");
}

#[test]
fn config_cycles_are_fatal_and_named() {
    let registry = Registry::new();
    registry.set_config("a", json!("${@CFG:b}"));
    registry.set_config("b", json!("${@CFG:a}"));
    let err = registry.resolve_configs().unwrap_err();
    match err {
        Error::ConfigCycle { chain } => {
            assert!(chain.contains(&"a".to_string()));
            assert!(chain.contains(&"b".to_string()));
        }
        other => panic!("expected ConfigCycle, got {other}"),
    }
}

/// A provider plug-in participates in the `@` dispatch.
#[test]
fn custom_providers_are_dispatched() {
    struct Fixed;
    impl ConfigProvider for Fixed {
        fn fetch(&self, key: &str) -> Result<Option<String>> {
            Ok((key == "token").then(|| "sekrit".to_string()))
        }
    }

    let registry = Registry::new();
    registry.register_provider("vault", std::sync::Arc::new(Fixed));
    registry.set_config("auth.token", json!("${@VAULT:token}"));
    registry.resolve_configs().expect("resolve");
    assert_eq!(registry.get_config("auth.token"), Some(json!("sekrit")));
}
