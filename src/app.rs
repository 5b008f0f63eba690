//! Apps: a router chain bound to one listener address.

use std::sync::Arc;

use crate::{
    client_router::ClientRequest,
    context::Context,
    format,
    listener::ListenerConfig,
    registry::Registry,
    router::Router,
    Result,
};

/// A reverse-proxy mount: requests under `prefix` are forwarded to the
/// client router named `target`, local or remote alike.
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    pub prefix: String,
    pub target: String,
}

/// A named router chain served on one address. Apps sharing an address are
/// merged before the server starts (chains concatenated, one listener).
pub struct App {
    name: String,
    addr: String,
    listener: ListenerConfig,
    router: Option<Router>,
}

impl App {
    #[must_use]
    pub fn new(name: &str, addr: &str) -> Self {
        Self {
            name: name.to_string(),
            addr: addr.to_string(),
            listener: ListenerConfig::default(),
            router: None,
        }
    }

    /// An app pre-wired with the `/_ping` liveness route.
    #[must_use]
    pub fn with_default_routes(name: &str, addr: &str) -> Self {
        Self::new(name, addr).add_router(ping_router(name))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    #[must_use]
    pub fn with_listener_config(mut self, config: ListenerConfig) -> Self {
        self.listener = config;
        self
    }

    #[must_use]
    pub fn listener_config(&self) -> &ListenerConfig {
        &self.listener
    }

    /// Append a router to this app's chain.
    #[must_use]
    pub fn add_router(mut self, router: Router) -> Self {
        match &mut self.router {
            Some(head) => head.append_chain(router),
            None => self.router = Some(router),
        }
        self
    }

    /// Prepend a router that forwards whole path prefixes to client-router
    /// targets. Because it is prepended, proxied prefixes win over any
    /// routes registered later in the chain.
    #[must_use]
    pub fn add_reverse_proxies(mut self, registry: Arc<Registry>, proxies: &[ReverseProxy]) -> Self {
        let mut proxy_router = Router::new(&format!("{}-proxy", self.name));
        for proxy in proxies {
            let registry = registry.clone();
            let target = proxy.target.clone();
            proxy_router = proxy_router.any_prefix(&proxy.prefix, move |ctx: Context| {
                let registry = registry.clone();
                let target = target.clone();
                async move {
                    let mut request = ClientRequest::new(
                        ctx.method().clone(),
                        ctx.path(),
                    );
                    request.headers = ctx.headers().clone();
                    request.body = ctx.body().clone();
                    let request = request.with_cancellation(ctx.cancellation().clone());
                    registry
                        .client_routers()
                        .call(&registry, &target, request)
                        .await
                }
            });
        }
        if let Some(existing) = self.router.take() {
            proxy_router.set_next_chain(existing);
        }
        self.router = Some(proxy_router);
        self
    }

    #[must_use]
    pub fn router(&self) -> Option<&Router> {
        self.router.as_ref()
    }

    pub(crate) fn router_mut(&mut self) -> Option<&mut Router> {
        self.router.as_mut()
    }

    pub(crate) fn put_router(&mut self, router: Router) {
        self.router = Some(router);
    }

    pub(crate) fn take_router(&mut self) -> Option<Router> {
        self.router.take()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .finish()
    }
}

fn ping_router(app_name: &str) -> Router {
    Router::new(&format!("{app_name}-ping")).get("/_ping", |_ctx: Context| async {
        format::json(serde_json::json!({ "ok": true }))
    })
}
