//! Deployment descriptions: building, sanity checks, selection and the
//! running client-router table.

use std::sync::Arc;

use lokstra::prelude::*;
use serde_json::json;

use super::fixtures;

fn split_spec() -> DeploymentSpec {
    DeploymentSpec::from_yaml_str(
        r"
deployments:
  split:
    servers:
      user:
        base_url: 'http://127.0.0.1'
        addr: ':9001'
        published_services: [user-svc]
      order:
        base_url: 'http://127.0.0.1'
        addr: ':9002'
        published_services: [order-svc]
  other:
    servers:
      billing:
        base_url: 'http://127.0.0.1'
        addr: ':9003'
        published_services: [user-svc]
",
    )
    .expect("yaml")
}

fn registry_with_types() -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    fixtures::register_db_pool_type(&registry);
    fixtures::register_user_type(&registry);
    fixtures::register_order_type(&registry);
    fixtures::declare_services(&registry, true);
    registry
}

#[test]
fn running_table_never_crosses_deployments() {
    let registry = registry_with_types();
    topology::load_description(&registry, &split_spec()).expect("load");
    topology::set_current_server(&registry, "split.order").expect("select");

    let routers = registry.client_routers();
    let order = routers.get("order-svc-router").expect("own router");
    assert!(order.is_local);
    assert_eq!(order.server_key, "split.order");

    // the peer copy comes from the same deployment, not from `other`
    let user = routers.get("user-svc-router").expect("peer router");
    assert!(!user.is_local);
    assert_eq!(user.server_key, "split.user");

    for entry in routers.running_table() {
        assert!(entry.server_key.starts_with("split."));
    }
}

#[test]
fn reselection_rebuilds_the_running_table() {
    let registry = registry_with_types();
    topology::load_description(&registry, &split_spec()).expect("load");

    topology::set_current_server(&registry, "split.user").expect("select user");
    assert!(registry
        .client_routers()
        .get("user-svc-router")
        .expect("entry")
        .is_local);

    topology::set_current_server(&registry, "other.billing").expect("select billing");
    let user = registry.client_routers().get("user-svc-router").expect("entry");
    assert_eq!(user.server_key, "other.billing");
    assert!(registry.client_routers().get("order-svc-router").is_none());
}

#[test]
fn unknown_published_service_fails_at_build() {
    let registry = Arc::new(Registry::new());
    let spec = DeploymentSpec::from_yaml_str(
        r"
deployments:
  single:
    servers:
      api:
        addr: ':8080'
        published_services: [ghost-svc]
",
    )
    .expect("yaml");
    let err = topology::load_description(&registry, &spec).unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "service type", .. }));
}

#[test]
fn unknown_router_reference_fails_at_build() {
    let registry = registry_with_types();
    let spec = DeploymentSpec::from_yaml_str(
        r"
deployments:
  single:
    servers:
      api:
        addr: ':8080'
        routers: [missing-router]
        published_services: [user-svc]
",
    )
    .expect("yaml");
    let err = topology::load_description(&registry, &spec).unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "router", .. }));
}

#[test]
fn unknown_middleware_on_declared_router_fails_at_build() {
    let registry = registry_with_types();
    registry
        .register_router(Router::new("extra-router").get("/extra", |_ctx: Context| async {
            format::text("ok")
        }))
        .expect("register");
    let spec = DeploymentSpec::from_yaml_str(
        r"
routers:
  - name: extra-router
    middlewares: [ghost-mw]
deployments:
  single:
    servers:
      api:
        addr: ':8080'
        routers: [extra-router]
        published_services: [user-svc]
",
    )
    .expect("yaml");
    let err = topology::load_description(&registry, &spec).unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "middleware", .. }));
}

#[test]
fn declared_configs_flow_into_the_store() {
    let registry = registry_with_types();
    let spec = DeploymentSpec::from_yaml_str(
        r"
configs:
  dsn: 'postgresql://localhost/db'
  limits:
    max_body: 65536
deployments:
  single:
    servers:
      api:
        addr: ':8080'
        published_services: [user-svc]
",
    )
    .expect("yaml");
    topology::load_description(&registry, &spec).expect("load");

    assert_eq!(
        registry.get_config("dsn"),
        Some(json!("postgresql://localhost/db"))
    );
    assert_eq!(registry.get_config("limits.max_body"), Some(json!(65536)));
}

#[test]
fn selection_applies_override_layers() {
    let registry = registry_with_types();
    let spec = DeploymentSpec::from_yaml_str(
        r"
configs:
  log.level: warn
deployments:
  single:
    config_overrides:
      log.level: info
    servers:
      api:
        addr: ':8080'
        published_services: [user-svc]
        config_overrides:
          log.format: json
",
    )
    .expect("yaml");
    topology::load_description(&registry, &spec).expect("load");
    topology::set_current_server(&registry, "single.api").expect("select");

    assert_eq!(registry.get_config("log.level"), Some(json!("info")));
    assert_eq!(registry.get_config("log.format"), Some(json!("json")));
}
