//! Route entries and the HTTP method set.

use axum::http::Method;
use serde::{Deserialize, Serialize};

use crate::{
    handler::{arc_handler, ArcHandler, Handler},
    middleware::MiddlewareSpec,
};

use super::pattern::PathPattern;

/// The closed set of route methods: the usual verbs plus `ANY`, which
/// matches every verb but loses against an exact method match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Any,
}

impl RouteMethod {
    #[must_use]
    pub fn from_http(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(Self::Get),
            Method::POST => Some(Self::Post),
            Method::PUT => Some(Self::Put),
            Method::PATCH => Some(Self::Patch),
            Method::DELETE => Some(Self::Delete),
            Method::HEAD => Some(Self::Head),
            Method::OPTIONS => Some(Self::Options),
            _ => None,
        }
    }

    /// The concrete HTTP method, or `None` for `ANY`.
    #[must_use]
    pub fn to_http(self) -> Option<Method> {
        match self {
            Self::Get => Some(Method::GET),
            Self::Post => Some(Method::POST),
            Self::Put => Some(Method::PUT),
            Self::Patch => Some(Method::PATCH),
            Self::Delete => Some(Method::DELETE),
            Self::Head => Some(Method::HEAD),
            Self::Options => Some(Method::OPTIONS),
            Self::Any => None,
        }
    }
}

impl std::fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Any => "ANY",
        };
        f.write_str(s)
    }
}

/// One entry in a router's route table.
#[derive(Clone)]
pub struct Route {
    pub(crate) name: Option<String>,
    pub(crate) method: RouteMethod,
    pub(crate) pattern: PathPattern,
    pub(crate) handler: ArcHandler,
    pub(crate) middlewares: Vec<MiddlewareSpec>,
}

impl Route {
    #[must_use]
    pub fn new<H: Handler>(method: RouteMethod, path: &str, handler: H) -> Self {
        Self {
            name: None,
            method,
            pattern: PathPattern::parse(path),
            handler: arc_handler(handler),
            middlewares: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_arc(method: RouteMethod, path: &str, handler: ArcHandler) -> Self {
        Self {
            name: None,
            method,
            pattern: PathPattern::parse(path),
            handler,
            middlewares: Vec::new(),
        }
    }

    /// Name the route so it can be retargeted later with `update_route`.
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn middleware(mut self, spec: MiddlewareSpec) -> Self {
        self.middlewares.push(spec);
        self
    }

    #[must_use]
    pub fn middlewares(mut self, specs: Vec<MiddlewareSpec>) -> Self {
        self.middlewares.extend(specs);
        self
    }

    #[must_use]
    pub fn method(&self) -> RouteMethod {
        self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.pattern.raw()
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("path", &self.pattern.raw())
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

/// Retroactive changes applied to a named route by `update_route`.
#[derive(Default)]
pub struct RouteOptions {
    pub(crate) method: Option<RouteMethod>,
    pub(crate) path: Option<String>,
    pub(crate) middlewares: Option<Vec<MiddlewareSpec>>,
}

impl RouteOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn method(mut self, method: RouteMethod) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    #[must_use]
    pub fn middlewares(mut self, specs: Vec<MiddlewareSpec>) -> Self {
        self.middlewares = Some(specs);
        self
    }
}
