//! Router auto-generation from a service's method set.
//!
//! A service that wants a generated router exposes its callable surface
//! through [`ExposedService::methods`]; the REST [`Convention`] maps method
//! names to `(verb, path)` pairs over the resource names in a
//! [`ConversionRule`]. A [`RouteOverride`] hides methods, re-routes
//! individual ones, and prepends a path prefix. The remote client shares
//! the same mapping, so both sides of a published service agree on paths.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    handler::ArcHandler,
    middleware::MiddlewareSpec,
    router::{pattern::join_paths, Route, RouteMethod, Router},
    Error, Result,
};

/// Naming convention used to derive routes from method names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Convention {
    #[default]
    Rest,
}

/// Parameters driving route derivation for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRule {
    #[serde(default)]
    pub convention: Convention,
    pub resource: String,
    pub resource_plural: String,
}

impl ConversionRule {
    #[must_use]
    pub fn rest(resource: &str, resource_plural: &str) -> Self {
        Self {
            convention: Convention::Rest,
            resource: resource.to_string(),
            resource_plural: resource_plural.to_string(),
        }
    }
}

impl Convention {
    /// The `(verb, path)` a method name maps to, or `None` when the name is
    /// outside the convention.
    #[must_use]
    pub fn route_for(self, method_name: &str, rule: &ConversionRule) -> Option<(RouteMethod, String)> {
        let plural = &rule.resource_plural;
        match self {
            Self::Rest => match method_name {
                name if name.starts_with("list") => {
                    Some((RouteMethod::Get, format!("/{plural}")))
                }
                "get_by_id" | "get" => Some((RouteMethod::Get, format!("/{plural}/{{id}}"))),
                "create" => Some((RouteMethod::Post, format!("/{plural}"))),
                "update" => Some((RouteMethod::Put, format!("/{plural}/{{id}}"))),
                "patch" => Some((RouteMethod::Patch, format!("/{plural}/{{id}}"))),
                "delete" => Some((RouteMethod::Delete, format!("/{plural}/{{id}}"))),
                _ => None,
            },
        }
    }
}

/// A custom `(verb, path)` for one method, overriding the convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRoute {
    pub method: RouteMethod,
    pub path: String,
}

/// Per-service adjustments on top of the convention.
#[derive(Clone, Default)]
pub struct RouteOverride {
    pub path_prefix: Option<String>,
    pub hidden: Vec<String>,
    pub custom: HashMap<String, CustomRoute>,
    pub middlewares: Vec<MiddlewareSpec>,
}

/// Routing metadata attached to a service type. Carries the conversion rule
/// plus override defaults; a [`RouteOverride`] given at generation time
/// supersedes field by field.
#[derive(Clone)]
pub struct RoutingMetadata {
    pub rule: ConversionRule,
    pub path_prefix: Option<String>,
    pub hidden: Vec<String>,
    pub custom: HashMap<String, CustomRoute>,
}

impl RoutingMetadata {
    #[must_use]
    pub fn new(rule: ConversionRule) -> Self {
        Self {
            rule,
            path_prefix: None,
            hidden: Vec::new(),
            custom: HashMap::new(),
        }
    }

    #[must_use]
    pub fn path_prefix(mut self, prefix: &str) -> Self {
        self.path_prefix = Some(prefix.to_string());
        self
    }

    #[must_use]
    pub fn hide(mut self, method_name: &str) -> Self {
        self.hidden.push(method_name.to_string());
        self
    }

    #[must_use]
    pub fn custom(mut self, method_name: &str, route: CustomRoute) -> Self {
        self.custom.insert(method_name.to_string(), route);
        self
    }
}

/// One callable method of a service, bound to the handler adapter that
/// parses the request into the method's arguments and renders its result.
pub struct ServiceMethod {
    pub name: String,
    pub handler: ArcHandler,
}

impl ServiceMethod {
    #[must_use]
    pub fn new(name: &str, handler: ArcHandler) -> Self {
        Self {
            name: name.to_string(),
            handler,
        }
    }
}

/// A service whose router can be generated. The method list is the Rust
/// rendition of "enumerate exported methods": explicit, typed, and shared
/// with the remote client.
pub trait ExposedService: Send + Sync {
    fn methods(&self) -> Vec<ServiceMethod>;
}

/// The effective `(verb, path)` for one method after merging metadata and
/// override: hidden methods yield `None`, custom routes win over the
/// convention, and the override's prefix supersedes the metadata's.
#[must_use]
pub fn method_route(
    method_name: &str,
    metadata: &RoutingMetadata,
    overrides: &RouteOverride,
) -> Option<(RouteMethod, String)> {
    if overrides.hidden.iter().any(|h| h == method_name)
        || metadata.hidden.iter().any(|h| h == method_name)
    {
        return None;
    }
    let (method, path) = overrides
        .custom
        .get(method_name)
        .or_else(|| metadata.custom.get(method_name))
        .map(|c| (c.method, c.path.clone()))
        .or_else(|| metadata.rule.convention.route_for(method_name, &metadata.rule))?;

    let prefix = overrides
        .path_prefix
        .as_deref()
        .or(metadata.path_prefix.as_deref())
        .unwrap_or("");
    Some((method, join_paths(prefix, &path)))
}

/// Generate a router named `router_name` from a service's method set.
///
/// # Errors
///
/// Returns [`Error::AlreadyExists`] when two methods map to the same
/// `(verb, path)`.
pub fn generate_router(
    router_name: &str,
    methods: Vec<ServiceMethod>,
    metadata: &RoutingMetadata,
    overrides: &RouteOverride,
) -> Result<Router> {
    let mut router = Router::new(router_name);
    let mut seen: HashSet<(RouteMethod, String)> = HashSet::new();

    for method in methods {
        let Some((verb, path)) = method_route(&method.name, metadata, overrides) else {
            tracing::debug!(
                method = %method.name,
                router = %router_name,
                "method outside the convention, skipped"
            );
            continue;
        };
        if !seen.insert((verb, path.clone())) {
            return Err(Error::AlreadyExists {
                kind: "generated route",
                name: format!("[{verb}] {path}"),
            });
        }
        router = router.add(
            Route::from_arc(verb, &path, method.handler)
                .named(&method.name)
                .middlewares(overrides.middlewares.clone()),
        );
    }
    Ok(router)
}

/// The conventional router name for a published service.
#[must_use]
pub fn service_router_name(service: &str) -> String {
    format!("{service}-router")
}
