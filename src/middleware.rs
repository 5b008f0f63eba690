//! Middleware plug-in runtime.
//!
//! A middleware *type* is a factory `(config) -> wrapper`, where a wrapper
//! turns a handler into a handler. A middleware *name* binds a type to a
//! config value; the wrapper is materialized on first use and cached.
//! Concrete middlewares (CORS, auth, rate limits) live outside this crate
//! and plug in through [`MiddlewareRegistry::register_type`].

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::{handler::ArcHandler, Error, Result};

/// A materialized middleware: wraps a handler into a new handler.
pub type MiddlewareFn = Arc<dyn Fn(ArcHandler) -> ArcHandler + Send + Sync>;

/// A middleware type's factory. Receives the instance config.
pub type MiddlewareFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<MiddlewareFn> + Send + Sync>;

/// A named middleware instance: `(type, config)`, materialized lazily.
pub struct MiddlewareName {
    pub name: String,
    pub type_name: String,
    pub config: serde_json::Value,
    cell: OnceLock<MiddlewareFn>,
}

/// A reference to a middleware from a router or route: either a registered
/// name, resolved at dispatch time, or an inline wrapper.
#[derive(Clone)]
pub enum MiddlewareSpec {
    Named(String),
    Inline(MiddlewareFn),
}

impl MiddlewareSpec {
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self::Named(name.to_string())
    }

    #[must_use]
    pub fn inline(f: impl Fn(ArcHandler) -> ArcHandler + Send + Sync + 'static) -> Self {
        Self::Inline(Arc::new(f))
    }
}

impl std::fmt::Debug for MiddlewareSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => write!(f, "Named({name})"),
            Self::Inline(_) => write!(f, "Inline"),
        }
    }
}

/// Registry of middleware types and named instances.
#[derive(Default)]
pub struct MiddlewareRegistry {
    types: DashMap<String, MiddlewareFactory>,
    names: DashMap<String, Arc<MiddlewareName>>,
}

impl MiddlewareRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a middleware type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] when the type name is taken.
    pub fn register_type(
        &self,
        name: &str,
        factory: impl Fn(&serde_json::Value) -> Result<MiddlewareFn> + Send + Sync + 'static,
    ) -> Result<()> {
        if self.types.contains_key(name) {
            return Err(Error::AlreadyExists {
                kind: "middleware type",
                name: name.to_string(),
            });
        }
        self.types.insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    /// Register a named instance binding `(type, config)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the type is unknown, or
    /// [`Error::AlreadyExists`] when the instance name is taken.
    pub fn register_name(
        &self,
        name: &str,
        type_name: &str,
        config: serde_json::Value,
    ) -> Result<()> {
        if !self.types.contains_key(type_name) {
            return Err(Error::NotFound {
                kind: "middleware type",
                name: type_name.to_string(),
            });
        }
        if self.names.contains_key(name) {
            return Err(Error::AlreadyExists {
                kind: "middleware",
                name: name.to_string(),
            });
        }
        self.names.insert(
            name.to_string(),
            Arc::new(MiddlewareName {
                name: name.to_string(),
                type_name: type_name.to_string(),
                config,
                cell: OnceLock::new(),
            }),
        );
        Ok(())
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Materialize a named middleware, building and caching the wrapper on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown name or type.
    pub fn materialize(&self, name: &str) -> Result<MiddlewareFn> {
        let entry = self
            .names
            .get(name)
            .ok_or_else(|| Error::NotFound {
                kind: "middleware",
                name: name.to_string(),
            })?
            .clone();
        if let Some(f) = entry.cell.get() {
            return Ok(f.clone());
        }
        let factory = self
            .types
            .get(&entry.type_name)
            .ok_or_else(|| Error::NotFound {
                kind: "middleware type",
                name: entry.type_name.clone(),
            })?
            .clone();
        let built = factory(&entry.config)?;
        Ok(entry.cell.get_or_init(|| built).clone())
    }

    /// Compose a middleware chain around `handler`. The first spec in the
    /// slice is outermost, so registration order is execution order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for any unresolvable named spec.
    pub fn compose(&self, specs: &[MiddlewareSpec], handler: ArcHandler) -> Result<ArcHandler> {
        let mut wrapped = handler;
        for spec in specs.iter().rev() {
            let f = match spec {
                MiddlewareSpec::Named(name) => self.materialize(name)?,
                MiddlewareSpec::Inline(f) => f.clone(),
            };
            wrapped = f(wrapped);
        }
        Ok(wrapped)
    }
}
