//! # Client routers
//!
//! A client router is a name-addressable dispatch target: locally it is an
//! in-process [`Router`], remotely it is an HTTP endpoint on a peer server.
//! Entries are registered per topology under `router@deployment.server`;
//! before a server starts, [`ClientRouterRegistry::build_running`] projects
//! them into the *running* table — current server first, then peers sharing
//! the deployment id, everything else dropped — so steady-state lookups are
//! a single read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue, Method};
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    context::{Context, ErrorDetail, Response},
    registry::{Registry, ServiceFactory, ServiceHandle},
    router::{
        autogen::{method_route, RouteOverride, RoutingMetadata},
        Router,
    },
    Error, Result,
};

/// Default timeout for remote dispatch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The deployment part of a composite `deployment.server` key.
#[must_use]
pub fn deployment_id(server_key: &str) -> &str {
    server_key.split_once('.').map_or(server_key, |(d, _)| d)
}

/// One dispatch target for a router name.
pub struct ClientRouter {
    pub router_name: String,
    /// Composite `deployment.server` key of the owning server.
    pub server_key: String,
    pub base_url: String,
    pub addr: String,
    pub is_local: bool,
    pub local: Option<Arc<Router>>,
    pub timeout: Duration,
}

impl ClientRouter {
    fn entry_key(&self) -> String {
        format!("{}@{}", self.router_name, self.server_key)
    }

    fn target_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}{}", self.addr)
    }
}

impl std::fmt::Debug for ClientRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRouter")
            .field("router", &self.router_name)
            .field("server", &self.server_key)
            .field("is_local", &self.is_local)
            .finish()
    }
}

/// A request sent through a client router, local or remote.
pub struct ClientRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cancellation: Option<CancellationToken>,
}

impl ClientRequest {
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            cancellation: None,
        }
    }

    /// Attach a JSON body.
    ///
    /// # Errors
    ///
    /// Returns a serialization error.
    pub fn json<T: serde::Serialize>(mut self, value: &T) -> Result<Self> {
        self.body = serde_json::to_vec(value)?.into();
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(self)
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn into_context(self) -> Context {
        let mut ctx = Context::new(self.method, &self.path)
            .with_headers(self.headers)
            .with_body(self.body);
        if let Some(token) = self.cancellation {
            ctx = ctx.with_cancellation(token);
        }
        ctx
    }
}

/// Registered entries plus the running table projected for the selected
/// server.
pub struct ClientRouterRegistry {
    entries: DashMap<String, Arc<ClientRouter>>,
    running: DashMap<String, Arc<ClientRouter>>,
    http: reqwest::Client,
}

impl Default for ClientRouterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRouterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            running: DashMap::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Register (or re-register) an entry under `router@server`.
    pub fn register(&self, entry: ClientRouter) {
        self.entries.insert(entry.entry_key(), Arc::new(entry));
    }

    /// Attach the in-process router instance to an entry; done for the
    /// selected server's own routers when a topology is activated.
    pub fn attach_local(&self, router_name: &str, server_key: &str, router: Arc<Router>) {
        let key = format!("{router_name}@{server_key}");
        if let Some(existing) = self.entries.get(&key).map(|e| e.clone()) {
            self.entries.insert(
                key,
                Arc::new(ClientRouter {
                    router_name: existing.router_name.clone(),
                    server_key: existing.server_key.clone(),
                    base_url: existing.base_url.clone(),
                    addr: existing.addr.clone(),
                    is_local: existing.is_local,
                    local: Some(router),
                    timeout: existing.timeout,
                }),
            );
        }
    }

    /// Project the running table for `current_server`.
    ///
    /// Pass 1 copies the current server's own entries (local). Pass 2 fills
    /// the remaining router names from peers sharing the deployment id
    /// (remote). Entries outside the deployment never appear, and each
    /// router name maps to at most one entry.
    pub fn build_running(&self, current_server: &str) {
        let current_deployment = deployment_id(current_server).to_string();
        self.running.clear();

        for entry in &self.entries {
            let e = entry.value();
            if e.server_key == current_server {
                self.running.insert(
                    e.router_name.clone(),
                    Arc::new(ClientRouter {
                        router_name: e.router_name.clone(),
                        server_key: e.server_key.clone(),
                        base_url: e.base_url.clone(),
                        addr: e.addr.clone(),
                        is_local: true,
                        local: e.local.clone(),
                        timeout: e.timeout,
                    }),
                );
            }
        }

        for entry in &self.entries {
            let e = entry.value();
            if e.server_key != current_server
                && deployment_id(&e.server_key) == current_deployment
                && !self.running.contains_key(&e.router_name)
            {
                self.running.insert(
                    e.router_name.clone(),
                    Arc::new(ClientRouter {
                        router_name: e.router_name.clone(),
                        server_key: e.server_key.clone(),
                        base_url: e.base_url.clone(),
                        addr: e.addr.clone(),
                        is_local: false,
                        local: None,
                        timeout: e.timeout,
                    }),
                );
            }
        }
    }

    /// O(1) lookup in the running table.
    #[must_use]
    pub fn get(&self, router_name: &str) -> Option<Arc<ClientRouter>> {
        self.running.get(router_name).map(|e| e.clone())
    }

    #[must_use]
    pub fn running_table(&self) -> Vec<Arc<ClientRouter>> {
        self.running.iter().map(|e| e.clone()).collect()
    }

    /// Dispatch a request by router name: in-process when the target is
    /// local, HTTP otherwise.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for a name absent from the running table,
    /// [`Error::Remote`] for an upstream status >= 400, transport errors
    /// otherwise.
    pub async fn call(
        &self,
        registry: &Registry,
        router_name: &str,
        request: ClientRequest,
    ) -> Result<Response> {
        let target = self.get(router_name).ok_or_else(|| Error::NotFound {
            kind: "client router",
            name: router_name.to_string(),
        })?;

        if target.is_local {
            if let Some(router) = &target.local {
                tracing::debug!(router = %router_name, "dispatching in-process");
                return Ok(router
                    .dispatch(request.into_context(), registry.middleware())
                    .await);
            }
        }
        self.call_remote(&target, request).await
    }

    async fn call_remote(
        &self,
        target: &ClientRouter,
        request: ClientRequest,
    ) -> Result<Response> {
        let url = format!(
            "{}/{}",
            target.target_url(),
            request.path.trim_start_matches('/')
        );
        tracing::debug!(router = %target.router_name, %url, "dispatching over http");

        let send = self
            .http
            .request(request.method.clone(), &url)
            .headers(request.headers.clone())
            .body(request.body.to_vec())
            .timeout(target.timeout)
            .send();

        let upstream = match &request.cancellation {
            Some(token) => {
                tokio::select! {
                    resp = send => resp?,
                    () = token.cancelled() => {
                        return Err(Error::Message(format!(
                            "call via '{}' cancelled",
                            target.router_name
                        )))
                    }
                }
            }
            None => send.await?,
        };

        let status = upstream.status();
        let headers = upstream.headers().clone();
        let body = upstream.bytes().await?;

        if status.as_u16() >= 400 {
            let detail: ErrorDetail = serde_json::from_slice(&body).unwrap_or_default();
            return Err(Error::Remote {
                router: target.router_name.clone(),
                status: status.as_u16(),
                code: detail.code.unwrap_or_else(|| "upstream_error".to_string()),
                message: detail
                    .message
                    .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned()),
            });
        }

        let mut response = Response::new(status).with_body(body);
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Arguments for a by-name remote service call: path params, query pairs,
/// optional JSON body.
#[derive(Default)]
pub struct CallArgs {
    pub params: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub cancellation: Option<CancellationToken>,
}

impl CallArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn query(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Generic remote-side client for a published service. Shares the route
/// mapping with the generated server router, so `call("get_by_id", ...)`
/// hits exactly the path the home server generated for `get_by_id`.
pub struct RemoteClient {
    router: String,
    metadata: RoutingMetadata,
    overrides: RouteOverride,
}

impl RemoteClient {
    #[must_use]
    pub fn new(router: &str, metadata: RoutingMetadata) -> Self {
        Self {
            router: router.to_string(),
            metadata,
            overrides: RouteOverride::default(),
        }
    }

    #[must_use]
    pub fn router_name(&self) -> &str {
        &self.router
    }

    /// Invoke a service method by name.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the method name is outside the service's
    /// route set, [`Error::BadRequest`] for missing path params, plus every
    /// dispatch failure of [`ClientRouterRegistry::call`].
    pub async fn call(
        &self,
        registry: &Registry,
        method_name: &str,
        args: CallArgs,
    ) -> Result<Value> {
        let (verb, template) = method_route(method_name, &self.metadata, &self.overrides)
            .ok_or_else(|| Error::NotFound {
                kind: "service method",
                name: method_name.to_string(),
            })?;

        let mut path = fill_path(&template, &args.params)?;
        if !args.query.is_empty() {
            let encoded: String = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&args.query)
                .finish();
            path = format!("{path}?{encoded}");
        }

        let mut request = ClientRequest::new(verb.to_http().unwrap_or(Method::POST), &path);
        if let Some(body) = &args.body {
            request = request.json(body)?;
        }
        if let Some(token) = args.cancellation {
            request = request.with_cancellation(token);
        }

        let response = registry
            .client_routers()
            .call(registry, &self.router, request)
            .await?;
        if response.body().is_empty() {
            return Ok(Value::Null);
        }
        response.parse_json()
    }
}

/// Remote factory for a published service type: builds a [`RemoteClient`]
/// from the `router` key the topology binder injects into the config.
#[must_use]
pub fn remote_client_factory(metadata: RoutingMetadata) -> ServiceFactory {
    ServiceFactory::from_config(move |config| {
        let router = config
            .get("router")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Config {
                key: "router".to_string(),
                reason: "remote factory config is missing the router name".to_string(),
            })?;
        Ok(ServiceHandle::new(RemoteClient::new(
            router,
            metadata.clone(),
        )))
    })
}

fn fill_path(template: &str, params: &HashMap<String, String>) -> Result<String> {
    let mut parts = Vec::new();
    for segment in template.split('/') {
        if segment.starts_with('{') && segment.ends_with('}') {
            let name = &segment[1..segment.len() - 1];
            let value = params.get(name).ok_or_else(|| {
                Error::BadRequest(format!("missing path parameter '{name}'"))
            })?;
            parts.push(value.clone());
        } else {
            parts.push(segment.to_string());
        }
    }
    Ok(parts.join("/"))
}
