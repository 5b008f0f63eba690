//! End-to-end scenarios over real listeners: a monolith, a two-server
//! split with transparent remote calls, and graceful shutdown.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lokstra::prelude::*;
use serde_json::{json, Value};
use serial_test::serial;

use super::fixtures;
use crate::infra_cfg::server;

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn monolith_serves_generated_routes_with_lazy_wiring() {
    let (registry, counters) = fixtures::full_registry(true);
    let db_calls = counters.db_calls;

    let spec = DeploymentSpec::from_yaml_str(&server::single_server_spec(
        "single", "api", 59110, &["user-svc"],
    ))
    .expect("yaml");
    topology::load_description(&registry, &spec).expect("load");

    let mut srv = server::start_from_topology(registry.clone(), "single.api").await;

    let url = format!("{}/users", server::get_base_url(59110));
    let resp = reqwest::get(&url).await.expect("request");
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.expect("json body");
    assert_eq!(body, json!([]));

    // a second request: the pool factory still ran exactly once
    let resp = reqwest::get(&url).await.expect("request");
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(db_calls.load(Ordering::SeqCst), 1);

    srv.shutdown(Duration::from_secs(1)).await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn split_deployment_calls_peer_over_http() {
    let split_yaml = r"
deployments:
  split:
    servers:
      user:
        base_url: 'http://127.0.0.1'
        addr: ':59120'
        published_services: [user-svc]
      order:
        base_url: 'http://127.0.0.1'
        addr: ':59121'
        published_services: [order-svc]
";
    // one registry per simulated process
    let (registry_user, user_side) = fixtures::full_registry(true);
    let (registry_order, order_side) = fixtures::full_registry(true);
    let user_hits_on_user_server = user_side.user_get_hits;
    let user_hits_on_order_server = order_side.user_get_hits;

    let spec = DeploymentSpec::from_yaml_str(split_yaml).expect("yaml");
    topology::load_description(&registry_user, &spec).expect("load user side");
    topology::load_description(&registry_order, &spec).expect("load order side");

    let mut user_srv = server::start_from_topology(registry_user.clone(), "split.user").await;
    let mut order_srv = server::start_from_topology(registry_order.clone(), "split.order").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/orders", server::get_base_url(59121)))
        .json(&json!({ "userId": "u1" }))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.expect("json body");
    assert_eq!(body["user"]["id"], json!("u1"));
    assert_eq!(body["user"]["name"], json!("user-u1"));

    // the lookup was served by the peer process over http
    assert_eq!(user_hits_on_user_server.load(Ordering::SeqCst), 1);
    assert_eq!(user_hits_on_order_server.load(Ordering::SeqCst), 0);

    order_srv.shutdown(Duration::from_secs(1)).await.expect("shutdown order");
    user_srv.shutdown(Duration::from_secs(1)).await.expect("shutdown user");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn colocated_deployment_answers_identically_in_process() {
    let (registry, counters) = fixtures::full_registry(true);
    let user_hits = counters.user_get_hits;

    let spec = DeploymentSpec::from_yaml_str(&server::single_server_spec(
        "single", "api", 59130, &["user-svc", "order-svc"],
    ))
    .expect("yaml");
    topology::load_description(&registry, &spec).expect("load");

    let mut srv = server::start_from_topology(registry.clone(), "single.api").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/orders", server::get_base_url(59130)))
        .json(&json!({ "userId": "u1" }))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.expect("json body");
    // same observable result as the split deployment, no http hop
    assert_eq!(body["user"]["id"], json!("u1"));
    assert_eq!(body["user"]["name"], json!("user-u1"));
    assert_eq!(user_hits.load(Ordering::SeqCst), 1);

    srv.shutdown(Duration::from_secs(1)).await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn graceful_shutdown_drains_in_flight_and_rejects_new_requests() {
    let registry = Arc::new(Registry::new());
    registry
        .register_router(Router::new("slow-router").get("/slow", |_ctx: Context| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            format::text("done")
        }))
        .expect("register");

    let spec = DeploymentSpec::from_yaml_str(
        r"
deployments:
  single:
    servers:
      api:
        base_url: 'http://127.0.0.1'
        addr: ':59140'
        routers: [slow-router]
",
    )
    .expect("yaml");
    topology::load_description(&registry, &spec).expect("load");

    let mut srv = server::start_from_topology(registry.clone(), "single.api").await;

    let in_flight = tokio::spawn(async {
        reqwest::get(format!("{}/slow", server::get_base_url(59140)))
            .await
            .expect("in-flight request")
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let shutting_down = tokio::spawn(async move {
        let started = Instant::now();
        let result = srv.shutdown(Duration::from_secs(1)).await;
        (started.elapsed(), result)
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the drain window is open: the in-flight request is still running, and
    // a fresh request at the same listener is turned away
    let rejected = reqwest::get(format!("{}/slow", server::get_base_url(59140)))
        .await
        .expect("request during drain");
    assert_eq!(rejected.status().as_u16(), 503);
    assert_eq!(
        rejected
            .headers()
            .get("retry-after")
            .map(|v| v.as_bytes()),
        Some(b"5".as_ref())
    );

    let resp = in_flight.await.expect("join");
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.expect("body"), "done");

    let (elapsed, result) = shutting_down.await.expect("join");
    result.expect("shutdown");
    assert!(elapsed < Duration::from_secs(1));

    // the listener is gone afterwards
    assert!(reqwest::get(format!("{}/slow", server::get_base_url(59140)))
        .await
        .is_err());
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn remote_errors_carry_the_upstream_envelope() {
    async fn grumpy(_ctx: Context) -> Result<Response> {
        Err(Error::BadRequest("no such user".to_string()))
    }

    let registry = Arc::new(Registry::new());
    registry
        .register_router(Router::new("grumpy-router").get("/users/{id}", grumpy))
        .expect("register");

    let spec = DeploymentSpec::from_yaml_str(
        r"
deployments:
  pair:
    servers:
      upstream:
        base_url: 'http://127.0.0.1'
        addr: ':59150'
        routers: [grumpy-router]
      downstream:
        base_url: 'http://127.0.0.1'
        addr: ':59151'
",
    )
    .expect("yaml");

    let registry_up = registry.clone();
    topology::load_description(&registry_up, &spec).expect("load upstream");
    let mut upstream = server::start_from_topology(registry_up.clone(), "pair.upstream").await;

    let registry_down = Arc::new(Registry::new());
    registry_down
        .register_router(Router::new("grumpy-router").get("/unused", |_ctx: Context| async {
            format::empty()
        }))
        .expect("register placeholder");
    topology::load_description(&registry_down, &spec).expect("load downstream");
    topology::set_current_server(&registry_down, "pair.downstream").expect("select");

    let err = registry_down
        .client_routers()
        .call(
            &registry_down,
            "grumpy-router",
            ClientRequest::new(axum::http::Method::GET, "/users/u1"),
        )
        .await
        .unwrap_err();
    match err {
        Error::Remote { status, code, message, .. } => {
            assert_eq!(status, 400);
            assert_eq!(code, "bad_request");
            assert_eq!(message, "no such user");
        }
        other => panic!("expected Remote, got {other}"),
    }

    upstream.shutdown(Duration::from_secs(1)).await.expect("shutdown");
}
