//! Auto-generated routers: coverage, overrides and name rules.

use std::collections::HashMap;

use axum::http::{Method, StatusCode};
use lokstra::{
    context::Context,
    middleware::MiddlewareRegistry,
    prelude::*,
    router::autogen::{self, CustomRoute},
};

fn methods(names: &[&str]) -> Vec<ServiceMethod> {
    names
        .iter()
        .map(|name| {
            ServiceMethod::new(
                name,
                arc_handler(|_ctx: Context| async { format::text("ok") }),
            )
        })
        .collect()
}

fn metadata() -> RoutingMetadata {
    RoutingMetadata::new(ConversionRule::rest("user", "users"))
}

#[test]
fn generated_set_is_convention_plus_custom_minus_hidden() {
    let overrides = RouteOverride {
        hidden: vec!["patch".to_string()],
        custom: HashMap::from([(
            "reindex".to_string(),
            CustomRoute {
                method: RouteMethod::Post,
                path: "/users/reindex".to_string(),
            },
        )]),
        ..RouteOverride::default()
    };
    let router = autogen::generate_router(
        "user-svc-router",
        methods(&["list", "get_by_id", "create", "update", "patch", "delete", "reindex"]),
        &metadata(),
        &overrides,
    )
    .expect("generate");

    let mut listed: Vec<String> = router.collect().iter().map(ToString::to_string).collect();
    listed.sort();
    assert_eq!(
        listed,
        vec![
            "[DELETE] /users/{id}",
            "[GET] /users",
            "[GET] /users/{id}",
            "[POST] /users",
            "[POST] /users/reindex",
            "[PUT] /users/{id}",
        ]
    );
}

#[tokio::test]
async fn generated_routes_dispatch_to_their_handlers() {
    let mut seen = Vec::new();
    for name in ["list", "get_by_id", "create"] {
        seen.push(name);
    }
    let router = autogen::generate_router(
        "user-svc-router",
        methods(&seen),
        &metadata(),
        &RouteOverride::default(),
    )
    .expect("generate");

    let mw = MiddlewareRegistry::new();
    for (method, path) in [
        (Method::GET, "/users"),
        (Method::GET, "/users/7"),
        (Method::POST, "/users"),
    ] {
        let resp = router.dispatch(Context::new(method, path), &mw).await;
        assert_eq!(resp.status(), StatusCode::OK, "path {path}");
    }
    let resp = router
        .dispatch(Context::new(Method::DELETE, "/users/7"), &mw)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[test]
fn hidden_from_metadata_and_override_both_apply() {
    let metadata = metadata().hide("delete");
    let overrides = RouteOverride {
        hidden: vec!["update".to_string()],
        ..RouteOverride::default()
    };
    assert!(autogen::method_route("delete", &metadata, &overrides).is_none());
    assert!(autogen::method_route("update", &metadata, &overrides).is_none());
    assert!(autogen::method_route("create", &metadata, &overrides).is_some());
}

#[test]
fn prefix_lands_on_every_generated_path() {
    let overrides = RouteOverride {
        path_prefix: Some("/api/v2".to_string()),
        ..RouteOverride::default()
    };
    let (_, path) = autogen::method_route("get_by_id", &metadata(), &overrides).expect("route");
    assert_eq!(path, "/api/v2/users/{id}");
}

#[test]
fn unique_paths_per_method_are_enforced() {
    let overrides = RouteOverride {
        custom: HashMap::from([(
            "list_special".to_string(),
            CustomRoute {
                method: RouteMethod::Get,
                path: "/users".to_string(),
            },
        )]),
        ..RouteOverride::default()
    };
    let err = autogen::generate_router(
        "r",
        methods(&["list", "list_special"]),
        &metadata(),
        &overrides,
    )
    .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));
}
