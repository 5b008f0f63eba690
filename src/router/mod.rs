//! # Router
//!
//! A [`Router`] owns a route table keyed by `(method, path pattern)`. It
//! supports a path prefix, per-router and per-route middleware chains, a
//! regex path-rewrite table, retroactive updates of named routes, deep
//! cloning, and linear chaining: on a miss the next router in the chain is
//! consulted, optionally only for paths under a prefix.

pub mod autogen;
pub mod pattern;
pub mod rewrite;
pub mod route;

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;

use axum::http::Method;
use futures_util::FutureExt;
use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    context::{Context, Response},
    handler::Handler,
    middleware::{MiddlewareRegistry, MiddlewareSpec},
    Error, Result,
};

use pattern::{join_paths, PathPattern};
use rewrite::RewriteTable;
pub use route::{Route, RouteMethod, RouteOptions};

lazy_static! {
    pub(crate) static ref NORMALIZE_URL: Regex =
        Regex::new(r"/+").expect("url normalization regex");
}

/// A link to the next router in a chain. With a prefix set, the next router
/// is only consulted for paths under that prefix; `strip_prefix` controls
/// whether the prefix is removed before the next router matches.
#[derive(Clone)]
struct NextChain {
    router: Router,
    prefix: Option<String>,
    strip_prefix: bool,
}

#[derive(Clone)]
pub struct Router {
    name: String,
    prefix: Option<String>,
    rewrites: RewriteTable,
    middlewares: Vec<MiddlewareSpec>,
    routes: Vec<Route>,
    next: Option<Box<NextChain>>,
}

/// A flattened route listing entry, for startup logs and snapshots.
pub struct ListRoute {
    pub method: RouteMethod,
    pub uri: String,
}

impl fmt::Display for ListRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.method, self.uri)
    }
}

impl Router {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prefix: None,
            rewrites: RewriteTable::default(),
            middlewares: Vec::new(),
            routes: Vec::new(),
            next: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    // ── registration ────────────────────────────────────────────────────

    /// Add a prepared route.
    ///
    /// # Panics
    ///
    /// Panics when `(method, path)` is already taken on this router; route
    /// tables are assembled at startup, where a duplicate is a programming
    /// error.
    #[must_use]
    pub fn add(mut self, route: Route) -> Self {
        let normalized = join_paths("", route.path());
        assert!(
            !self
                .routes
                .iter()
                .any(|r| r.method == route.method && join_paths("", r.path()) == normalized),
            "route [{}] {} already registered on router '{}'",
            route.method(),
            normalized,
            self.name
        );
        self.routes.push(route);
        self
    }

    #[must_use]
    pub fn get<H: Handler>(self, path: &str, handler: H) -> Self {
        self.add(Route::new(RouteMethod::Get, path, handler))
    }

    #[must_use]
    pub fn post<H: Handler>(self, path: &str, handler: H) -> Self {
        self.add(Route::new(RouteMethod::Post, path, handler))
    }

    #[must_use]
    pub fn put<H: Handler>(self, path: &str, handler: H) -> Self {
        self.add(Route::new(RouteMethod::Put, path, handler))
    }

    #[must_use]
    pub fn patch<H: Handler>(self, path: &str, handler: H) -> Self {
        self.add(Route::new(RouteMethod::Patch, path, handler))
    }

    #[must_use]
    pub fn delete<H: Handler>(self, path: &str, handler: H) -> Self {
        self.add(Route::new(RouteMethod::Delete, path, handler))
    }

    #[must_use]
    pub fn head<H: Handler>(self, path: &str, handler: H) -> Self {
        self.add(Route::new(RouteMethod::Head, path, handler))
    }

    #[must_use]
    pub fn options<H: Handler>(self, path: &str, handler: H) -> Self {
        self.add(Route::new(RouteMethod::Options, path, handler))
    }

    /// Register a route matching every verb. Loses against an exact method
    /// match on the same path.
    #[must_use]
    pub fn any<H: Handler>(self, path: &str, handler: H) -> Self {
        self.add(Route::new(RouteMethod::Any, path, handler))
    }

    /// Register a catch-all under `prefix`: any verb, any deeper path.
    #[must_use]
    pub fn any_prefix<H: Handler>(self, prefix: &str, handler: H) -> Self {
        let path = join_paths(prefix, "/**");
        self.add(Route::new(RouteMethod::Any, &path, handler))
    }

    /// Install a sub-group: routes registered inside `configure` land on
    /// this router with `prefix` prepended and the group middlewares
    /// inserted before each route's own.
    #[must_use]
    pub fn group(
        mut self,
        prefix: &str,
        middlewares: Vec<MiddlewareSpec>,
        configure: impl FnOnce(Router) -> Router,
    ) -> Self {
        let sub = configure(Router::new(&format!("{}:{prefix}", self.name)));
        for mut route in sub.routes {
            route.pattern = PathPattern::parse(&join_paths(prefix, route.pattern.raw()));
            let mut specs = middlewares.clone();
            specs.extend(sub.middlewares.iter().cloned());
            specs.extend(route.middlewares);
            route.middlewares = specs;
            self = self.add(route);
        }
        self
    }

    /// Append router-level middleware; runs before every route's own chain,
    /// in registration order.
    #[must_use]
    pub fn with_middleware(mut self, spec: MiddlewareSpec) -> Self {
        self.middlewares.push(spec);
        self
    }

    pub fn use_middleware(&mut self, spec: MiddlewareSpec) {
        self.middlewares.push(spec);
    }

    // ── prefix / rewrites / retroactive updates ─────────────────────────

    #[must_use]
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.set_path_prefix(prefix);
        self
    }

    pub fn set_path_prefix(&mut self, prefix: &str) {
        self.prefix = Some(prefix.to_string());
    }

    #[must_use]
    pub fn path_prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Install the ordered rewrite table applied before matching.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid rewrite regex.
    pub fn set_path_rewrites(&mut self, rules: &[(String, String)]) -> Result<()> {
        self.rewrites = RewriteTable::compile(rules)?;
        Ok(())
    }

    /// Retarget a previously registered named route.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no route carries `name`, or
    /// [`Error::AlreadyExists`] when the change collides with another route.
    pub fn update_route(&mut self, name: &str, options: RouteOptions) -> Result<()> {
        let idx = self
            .routes
            .iter()
            .position(|r| r.name.as_deref() == Some(name))
            .ok_or_else(|| Error::NotFound {
                kind: "route",
                name: name.to_string(),
            })?;

        let method = options.method.unwrap_or(self.routes[idx].method);
        let path = options
            .path
            .clone()
            .unwrap_or_else(|| self.routes[idx].path().to_string());
        let normalized = join_paths("", &path);
        if self.routes.iter().enumerate().any(|(i, r)| {
            i != idx && r.method == method && join_paths("", r.path()) == normalized
        }) {
            return Err(Error::AlreadyExists {
                kind: "route",
                name: format!("[{method}] {normalized}"),
            });
        }

        let route = &mut self.routes[idx];
        route.method = method;
        route.pattern = PathPattern::parse(&path);
        if let Some(middlewares) = options.middlewares {
            route.middlewares = middlewares;
        }
        Ok(())
    }

    // ── chaining ────────────────────────────────────────────────────────

    /// Consult `router` whenever this one has no matching route.
    pub fn set_next_chain(&mut self, router: Router) {
        self.next = Some(Box::new(NextChain {
            router,
            prefix: None,
            strip_prefix: false,
        }));
    }

    /// Like [`set_next_chain`](Self::set_next_chain), but the next router
    /// only sees paths under `prefix`. With `strip_prefix`, the prefix is
    /// removed before the next router matches.
    pub fn set_next_chain_with_prefix(&mut self, router: Router, prefix: &str, strip_prefix: bool) {
        self.next = Some(Box::new(NextChain {
            router,
            prefix: Some(prefix.to_string()),
            strip_prefix,
        }));
    }

    #[must_use]
    pub fn next_chain(&self) -> Option<&Router> {
        self.next.as_deref().map(|n| &n.router)
    }

    /// Append `router` at the tail of the chain (used when apps sharing an
    /// address are merged).
    pub(crate) fn append_chain(&mut self, router: Router) {
        match &mut self.next {
            Some(next) => next.router.append_chain(router),
            None => self.set_next_chain(router),
        }
    }

    // ── listing ─────────────────────────────────────────────────────────

    /// The route table of this router (chain links excluded), with the
    /// router prefix applied.
    #[must_use]
    pub fn collect(&self) -> Vec<ListRoute> {
        let prefix = self.prefix.clone().unwrap_or_default();
        self.routes
            .iter()
            .map(|r| ListRoute {
                method: r.method,
                uri: join_paths(&prefix, r.path()),
            })
            .collect()
    }

    /// Log the route table of this router and every chained router.
    pub fn print_routes(&self) {
        let mut current = Some(self);
        while let Some(router) = current {
            for route in router.collect() {
                tracing::info!(router = %router.name, "{route}");
            }
            current = router.next_chain();
        }
    }

    // ── dispatch ────────────────────────────────────────────────────────

    /// Dispatch a request through this router and its chain. Never fails:
    /// handler errors and panics are rendered as JSON error envelopes, and
    /// a miss across the whole chain is a 404.
    pub async fn dispatch(&self, mut ctx: Context, middleware: &MiddlewareRegistry) -> Response {
        let mut current = self;
        let mut path = ctx.path().to_string();
        loop {
            path = current.rewrites.apply(&path);

            if let Some((route, params)) = current.find_route(&path, ctx.method()) {
                ctx.set_path(path);
                ctx.set_params(params);

                let mut specs = current.middlewares.clone();
                specs.extend(route.middlewares.iter().cloned());
                let chain = match middleware.compose(&specs, route.handler.clone()) {
                    Ok(chain) => chain,
                    Err(err) => {
                        tracing::error!(
                            router = %current.name,
                            route = %route.path(),
                            error = %err,
                            "middleware chain failed to materialize"
                        );
                        return Response::from_error(&Error::Message(err.to_string()));
                    }
                };

                return match AssertUnwindSafe(chain.call(ctx)).catch_unwind().await {
                    Ok(Ok(resp)) => resp,
                    Ok(Err(err)) => {
                        tracing::debug!(router = %current.name, error = %err, "handler error");
                        Response::from_error(&err)
                    }
                    Err(_panic) => {
                        tracing::error!(
                            router = %current.name,
                            route = %route.path(),
                            "handler panicked"
                        );
                        Response::from_error(&Error::Message("handler panicked".to_string()))
                    }
                };
            }

            match &current.next {
                Some(link) => {
                    if let Some(link_prefix) = &link.prefix {
                        match strip_path_prefix(&path, link_prefix) {
                            Some(rest) => {
                                if link.strip_prefix {
                                    path = rest;
                                }
                            }
                            None => break,
                        }
                    }
                    current = &link.router;
                }
                None => break,
            }
        }
        Response::from_error(&Error::RouteNotFound)
    }

    /// Find the best matching route: exact method first, then `ANY`;
    /// within a pass the most specific pattern wins and earlier
    /// registration breaks ties.
    fn find_route(&self, path: &str, method: &Method) -> Option<(&Route, HashMap<String, String>)> {
        let local = match &self.prefix {
            Some(prefix) => strip_path_prefix(path, prefix)?,
            None => path.to_string(),
        };

        let exact = RouteMethod::from_http(method);
        for any_pass in [false, true] {
            let mut best: Option<(&Route, HashMap<String, String>, Vec<u8>)> = None;
            for route in &self.routes {
                let method_matches = if any_pass {
                    route.method == RouteMethod::Any
                } else {
                    exact == Some(route.method)
                };
                if !method_matches {
                    continue;
                }
                if let Some(params) = route.pattern.matches(&local) {
                    let specificity = route.pattern.specificity();
                    if best
                        .as_ref()
                        .map_or(true, |(_, _, current)| specificity > *current)
                    {
                        best = Some((route, params, specificity));
                    }
                }
            }
            if let Some((route, params, _)) = best {
                return Some((route, params));
            }
        }
        None
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("routes", &self.routes.len())
            .field("chained", &self.next.is_some())
            .finish()
    }
}

/// Strip `prefix` from `path`, segment-aligned. Returns the remainder with
/// a leading slash, or `None` when the path is not under the prefix.
fn strip_path_prefix(path: &str, prefix: &str) -> Option<String> {
    let prefix = join_paths("", prefix);
    if prefix == "/" {
        return Some(path.to_string());
    }
    let rest = path.strip_prefix(&prefix)?;
    if rest.is_empty() {
        Some("/".to_string())
    } else if rest.starts_with('/') {
        Some(rest.to_string())
    } else {
        None
    }
}
