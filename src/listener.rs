//! Listener contract and the default TCP listener.
//!
//! A listener binds one address and feeds accepted requests into an
//! [`AppEngine`], which converts them to [`Context`]s and dispatches the
//! app's router chain. Alternate transports (TLS, HTTP/3) implement
//! [`Listener`] outside this crate.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    context::{Context, Response},
    registry::Registry,
    router::Router,
    Result,
};

/// Listener selection and tuning from the deployment description. Only the
/// engine name is interpreted here; transport-specific keys are passed
/// through to the [`Listener`] implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

fn default_engine() -> String {
    "tcp".to_string()
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            options: serde_json::Map::new(),
        }
    }
}

/// Per-app request engine: the merged router chain plus the registry, with
/// the draining flag consulted on every request during shutdown.
pub struct AppEngine {
    name: String,
    router: Router,
    registry: Arc<Registry>,
    draining: AtomicBool,
    in_flight: AtomicUsize,
    shutdown: CancellationToken,
}

impl AppEngine {
    #[must_use]
    pub fn new(name: &str, router: Router, registry: Arc<Registry>, shutdown: CancellationToken) -> Self {
        Self {
            name: name.to_string(),
            router,
            registry,
            draining: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            shutdown,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Reject new requests with `503 Retry-After: 5`; in-flight requests
    /// keep running.
    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Requests currently inside the router chain. The drain window stays
    /// open until this reaches zero.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Convert an incoming request, dispatch the chain, and return the
    /// buffered response.
    pub async fn handle(&self, request: axum::extract::Request) -> Response {
        if self.draining.load(Ordering::SeqCst) {
            return Response::new(StatusCode::SERVICE_UNAVAILABLE)
                .with_header(header::RETRY_AFTER, HeaderValue::from_static("5"));
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let response = self.process(request).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }

    async fn process(&self, request: axum::extract::Request) -> Response {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);

        let body = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(app = %self.name, error = %err, "failed to read request body");
                return Response::from_error(&crate::Error::BadRequest(
                    "unreadable request body".to_string(),
                ));
            }
        };

        let ctx = Context::new(parts.method, &path_and_query)
            .with_headers(parts.headers)
            .with_body(body)
            .with_cancellation(self.shutdown.child_token());

        tracing::debug!(
            app = %self.name,
            method = %ctx.method(),
            path = %ctx.path(),
            request_id = %ctx.request_id(),
            "request"
        );
        self.router.dispatch(ctx, self.registry.middleware()).await
    }
}

/// Transport contract: bind `addr`, serve requests through `engine` until
/// `shutdown` fires, then drain and return.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn serve(
        &self,
        addr: &str,
        engine: Arc<AppEngine>,
        shutdown: CancellationToken,
    ) -> Result<()>;
}

/// Default cleartext TCP listener.
pub struct TcpListener;

#[async_trait]
impl Listener for TcpListener {
    async fn serve(
        &self,
        addr: &str,
        engine: Arc<AppEngine>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let bind_addr = normalize_addr(addr);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        tracing::info!(app = %engine.name(), addr = %bind_addr, "listening");

        let app = axum::Router::new().fallback(move |request: axum::extract::Request| {
            let engine = engine.clone();
            async move { engine.handle(request).await }
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

/// Accept both `":8080"` and full `host:port` address forms.
fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}
