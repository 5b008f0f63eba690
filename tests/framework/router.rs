//! Router behavior exercised the way apps consume it.

use axum::http::{Method, StatusCode};
use lokstra::{context::Context, middleware::MiddlewareRegistry, prelude::*};

async fn dispatch(router: &Router, method: Method, path: &str) -> lokstra::context::Response {
    router
        .dispatch(Context::new(method, path), &MiddlewareRegistry::new())
        .await
}

fn v1_router() -> Router {
    Router::new("api")
        .prefix("/v1")
        .get("/x", |_ctx: Context| async { format::text("x") })
}

#[tokio::test]
async fn clone_keeps_original_routing_unchanged() {
    let router = v1_router();
    let mut cloned = router.clone();
    cloned.set_path_prefix("/v2");

    assert_eq!(dispatch(&router, Method::GET, "/v1/x").await.status(), StatusCode::OK);
    assert_eq!(
        dispatch(&router, Method::GET, "/v2/x").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(dispatch(&cloned, Method::GET, "/v2/x").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn clone_update_route_is_isolated_too() {
    let router = Router::new("api").add(
        Route::new(RouteMethod::Get, "/stable", |_ctx: Context| async {
            format::text("ok")
        })
        .named("entry"),
    );
    let mut cloned = router.clone();
    cloned
        .update_route("entry", RouteOptions::new().path("/moved"))
        .expect("update");

    assert_eq!(dispatch(&router, Method::GET, "/stable").await.status(), StatusCode::OK);
    assert_eq!(
        dispatch(&router, Method::GET, "/moved").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(dispatch(&cloned, Method::GET, "/moved").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn clone_chain_changes_do_not_leak() {
    let router = Router::new("api").get("/a", |_ctx: Context| async { format::text("a") });
    let mut cloned = router.clone();
    cloned.set_next_chain(
        Router::new("extra").get("/b", |_ctx: Context| async { format::text("b") }),
    );

    assert_eq!(
        dispatch(&router, Method::GET, "/b").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(dispatch(&cloned, Method::GET, "/b").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn group_prefixes_compose_literally() {
    let router = Router::new("api").prefix("/api").group("/admin", vec![], |g| {
        g.get("/users", |_ctx: Context| async { format::text("ok") })
            .get("/users/{id}", |_ctx: Context| async { format::text("one") })
    });

    let listed: Vec<String> = router.collect().iter().map(ToString::to_string).collect();
    assert_eq!(listed, vec!["[GET] /api/admin/users", "[GET] /api/admin/users/{id}"]);

    assert_eq!(
        dispatch(&router, Method::GET, "/api/admin/users").await.status(),
        StatusCode::OK
    );
    // no double slashes, no accidental trailing-slash match
    assert_eq!(
        dispatch(&router, Method::GET, "/api//admin/users").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn registered_router_definitions_clone_per_use() {
    let registry = Registry::new();
    registry
        .register_router(v1_router())
        .expect("register router");

    let mut first = registry.router("api").expect("clone");
    first.set_path_prefix("/changed");
    let second = registry.router("api").expect("clone");

    assert_eq!(second.path_prefix(), Some("/v1"));
    assert_eq!(
        dispatch(&second, Method::GET, "/v1/x").await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn middleware_order_is_router_then_route() {
    fn tag(tag: &'static str) -> MiddlewareSpec {
        MiddlewareSpec::inline(move |next: ArcHandler| {
            arc_handler(move |ctx: Context| {
                let next = next.clone();
                async move {
                    let resp = next.call(ctx).await?;
                    let mut body = resp.body().to_vec();
                    body.extend_from_slice(tag.as_bytes());
                    Ok(resp.with_body(body))
                }
            })
        })
    }

    let router = Router::new("api")
        .with_middleware(tag("R"))
        .add(
            Route::new(RouteMethod::Get, "/x", |_ctx: Context| async {
                format::text("h")
            })
            .middleware(tag("r")),
        );

    let resp = dispatch(&router, Method::GET, "/x").await;
    // unwind order: handler body, then route middleware, then router middleware
    assert_eq!(resp.body().as_ref(), b"hrR");
}
