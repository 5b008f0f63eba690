//! # Process-wide registry
//!
//! One [`Registry`] instance holds everything the framework resolves by
//! name: config values, service types, middleware types and named
//! instances, router definitions, service instances (eager and lazy), and
//! built deployment topologies. Mutation happens at startup; steady-state
//! access is read-only. Tests create fresh instances with
//! [`Registry::new`] instead of touching the process-global one.

pub mod lazy;
pub mod service;

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use lazy::{Cached, ProvideMode, ServiceRegistry};
pub use service::{
    bind_config, DepsMap, ServiceDef, ServiceFactory, ServiceHandle, ServiceType, Shutdown,
};

use crate::{
    client_router::ClientRouterRegistry,
    config::{self, ConfigProvider, ConfigStore, ProviderSet},
    middleware::MiddlewareRegistry,
    router::Router,
    topology::ServerTopology,
    Error, Result,
};

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

pub struct Registry {
    configs: ConfigStore,
    providers: ProviderSet,
    service_types: DashMap<String, Arc<ServiceType>>,
    service_defs: DashMap<String, ServiceDef>,
    middleware: MiddlewareRegistry,
    routers: DashMap<String, Router>,
    router_decls: DashMap<String, crate::topology::RouterDecl>,
    services: ServiceRegistry,
    topologies: DashMap<String, Arc<ServerTopology>>,
    client_routers: ClientRouterRegistry,
    current_server: RwLock<Option<String>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A fresh, empty registry. Production code uses [`global`](Self::global);
    /// tests build their own.
    #[must_use]
    pub fn new() -> Self {
        Self {
            configs: ConfigStore::new(),
            providers: ProviderSet::new(),
            service_types: DashMap::new(),
            service_defs: DashMap::new(),
            middleware: MiddlewareRegistry::new(),
            routers: DashMap::new(),
            router_decls: DashMap::new(),
            services: ServiceRegistry::new(),
            topologies: DashMap::new(),
            client_routers: ClientRouterRegistry::new(),
            current_server: RwLock::new(None),
        }
    }

    /// The process-global registry.
    pub fn global() -> Arc<Self> {
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    // ── configs ─────────────────────────────────────────────────────────

    pub fn set_config(&self, key: &str, value: Value) {
        self.configs.set(key, value);
    }

    #[must_use]
    pub fn get_config(&self, key: &str) -> Option<Value> {
        self.configs.get(key)
    }

    /// Read a config subtree bound onto a struct.
    ///
    /// # Errors
    ///
    /// See [`ConfigStore::get_as`].
    pub fn get_config_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.configs.get_as(key)
    }

    pub fn register_provider(&self, name: &str, provider: Arc<dyn ConfigProvider>) {
        self.providers.register(name, provider);
    }

    /// Run both `${...}` resolution passes over all declared values.
    ///
    /// # Errors
    ///
    /// See [`config::resolve_configs`]. Fatal at startup.
    pub fn resolve_configs(&self) -> Result<()> {
        config::resolve_configs(&self.configs, &self.providers)
    }

    /// Resolve a single expression against the config store.
    ///
    /// # Errors
    ///
    /// See [`config::simple_resolve`].
    pub fn simple_resolve(&self, expr: &str) -> Result<String> {
        config::simple_resolve(&self.configs, expr)
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.configs
    }

    pub(crate) fn provider_set(&self) -> &ProviderSet {
        &self.providers
    }

    // ── service types and declarations ──────────────────────────────────

    /// Register a service type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FactoryMissing`] when the type has no factory at
    /// all, or [`Error::AlreadyExists`] for a duplicate name.
    pub fn register_service_type(&self, service_type: ServiceType) -> Result<()> {
        service_type.validate()?;
        if self.service_types.contains_key(&service_type.name) {
            return Err(Error::AlreadyExists {
                kind: "service type",
                name: service_type.name,
            });
        }
        self.service_types
            .insert(service_type.name.clone(), Arc::new(service_type));
        Ok(())
    }

    #[must_use]
    pub fn service_type(&self, name: &str) -> Option<Arc<ServiceType>> {
        self.service_types.get(name).map(|t| t.clone())
    }

    /// Declare a service instance (from the deployment description or code);
    /// the factory side is chosen when a server is selected.
    pub fn declare_service(&self, def: ServiceDef) {
        self.service_defs.insert(def.name.clone(), def);
    }

    #[must_use]
    pub fn service_def(&self, name: &str) -> Option<ServiceDef> {
        self.service_defs.get(name).map(|d| d.clone())
    }

    #[must_use]
    pub fn service_defs(&self) -> Vec<ServiceDef> {
        self.service_defs.iter().map(|d| d.clone()).collect()
    }

    // ── service instances ───────────────────────────────────────────────

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Register an eager instance.
    pub fn register_service(&self, name: &str, handle: ServiceHandle) {
        self.services
            .register(name, handle, ProvideMode::PanicIfExists);
    }

    pub fn register_lazy_service(
        &self,
        name: &str,
        factory: ServiceFactory,
        config: Value,
    ) {
        self.services
            .register_lazy(name, factory, config, ProvideMode::PanicIfExists);
    }

    pub fn register_lazy_service_with_deps(
        &self,
        name: &str,
        factory: ServiceFactory,
        deps: HashMap<String, String>,
        config: Value,
        mode: ProvideMode,
    ) {
        self.services
            .register_lazy_with_deps(name, factory, deps, config, mode);
    }

    /// Typed retrieval; builds lazily on first access.
    ///
    /// # Errors
    ///
    /// See [`ServiceRegistry::get`].
    pub fn get_service<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.services.get(name)
    }

    #[must_use]
    pub fn try_get_service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.services.try_get(name)
    }

    /// # Panics
    ///
    /// Panics on a missing name, failed build or type mismatch.
    #[must_use]
    pub fn must_get_service<T: Any + Send + Sync>(&self, name: &str) -> Arc<T> {
        self.services.must_get(name)
    }

    /// Run every instance's shutdown hook; returns collected error strings.
    #[must_use]
    pub fn shutdown_services(&self) -> Vec<String> {
        self.services.shutdown_all()
    }

    // ── middleware ──────────────────────────────────────────────────────

    pub fn middleware(&self) -> &MiddlewareRegistry {
        &self.middleware
    }

    // ── routers ─────────────────────────────────────────────────────────

    /// Register a router definition by its name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] for a duplicate name.
    pub fn register_router(&self, router: Router) -> Result<()> {
        let name = router.name().to_string();
        if self.routers.contains_key(&name) {
            return Err(Error::AlreadyExists {
                kind: "router",
                name,
            });
        }
        self.routers.insert(name, router);
        Ok(())
    }

    /// An independent clone of the named router definition.
    #[must_use]
    pub fn router(&self, name: &str) -> Option<Router> {
        self.routers.get(name).map(|r| r.clone())
    }

    #[must_use]
    pub fn has_router(&self, name: &str) -> bool {
        self.routers.contains_key(name)
    }

    /// Declare per-router configuration (prefix, rewrites, middlewares,
    /// custom routes) applied when the router is instantiated for an app.
    pub fn declare_router(&self, decl: crate::topology::RouterDecl) {
        self.router_decls.insert(decl.name.clone(), decl);
    }

    #[must_use]
    pub fn router_decl(&self, name: &str) -> Option<crate::topology::RouterDecl> {
        self.router_decls.get(name).map(|d| d.clone())
    }

    #[must_use]
    pub fn router_decls(&self) -> Vec<crate::topology::RouterDecl> {
        self.router_decls.iter().map(|d| d.clone()).collect()
    }

    // ── topologies / current server ─────────────────────────────────────

    pub(crate) fn store_topology(&self, topology: ServerTopology) {
        self.topologies
            .insert(topology.key.clone(), Arc::new(topology));
    }

    #[must_use]
    pub fn topology(&self, key: &str) -> Option<Arc<ServerTopology>> {
        self.topologies.get(key).map(|t| t.clone())
    }

    #[must_use]
    pub fn topologies(&self) -> Vec<Arc<ServerTopology>> {
        self.topologies.iter().map(|t| t.clone()).collect()
    }

    #[must_use]
    pub fn current_server(&self) -> Option<String> {
        self.current_server
            .read()
            .expect("current server lock poisoned")
            .clone()
    }

    pub(crate) fn set_current_server_key(&self, key: &str) {
        *self
            .current_server
            .write()
            .expect("current server lock poisoned") = Some(key.to_string());
    }

    // ── client routers ──────────────────────────────────────────────────

    pub fn client_routers(&self) -> &ClientRouterRegistry {
        &self.client_routers
    }
}
