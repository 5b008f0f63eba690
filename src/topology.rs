//! # Deployment topology
//!
//! A declarative description (YAML or code) names configs, services,
//! middleware instances, routers and deployments. [`load_description`]
//! feeds it into a registry; [`build_topologies`] compiles every
//! `deployment.server` into a [`ServerTopology`] with fail-fast sanity
//! checks; [`set_current_server`] activates one topology, deciding for each
//! published service whether its instance is built from the local factory
//! or the remote-client factory.
//!
//! Example description:
//!
//! ```yaml
//! configs:
//!   dsn: "postgresql://localhost/app"
//! services:
//!   - name: user-svc
//!     type: user-svc
//! deployments:
//!   split:
//!     servers:
//!       user:
//!         base_url: "http://localhost"
//!         addr: ":9001"
//!         published_services: [user-svc]
//!       order:
//!         base_url: "http://localhost"
//!         addr: ":9002"
//!         published_services: [order-svc]
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    client_router::{ClientRouter, DEFAULT_TIMEOUT},
    registry::{ProvideMode, Registry, ServiceDef},
    router::{
        autogen::{service_router_name, RouteOverride},
        RouteMethod, RouteOptions, Router,
    },
    Error, Result,
};

// ── description model ───────────────────────────────────────────────────

/// Root of the deployment description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default)]
    pub configs: serde_json::Map<String, Value>,
    #[serde(default)]
    pub services: Vec<ServiceDef>,
    #[serde(default)]
    pub middlewares: Vec<MiddlewareDecl>,
    #[serde(default)]
    pub routers: Vec<RouterDecl>,
    #[serde(default)]
    pub deployments: BTreeMap<String, DeploymentDecl>,
}

impl DeploymentSpec {
    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// Returns the YAML error on malformed input.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// A named middleware instance: `(type, config)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub config: Value,
}

/// Declarative configuration of a router, applied when the router is
/// instantiated for an app.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterDecl {
    pub name: String,
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub path_rewrites: Vec<RewriteDecl>,
    #[serde(default)]
    pub middlewares: Vec<String>,
    #[serde(default)]
    pub custom_routes: Vec<CustomRouteDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteDecl {
    pub pattern: String,
    pub replacement: String,
}

/// Retargeting of one named route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRouteDecl {
    pub name: String,
    #[serde(default)]
    pub method: Option<RouteMethod>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub middlewares: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentDecl {
    #[serde(default)]
    pub config_overrides: serde_json::Map<String, Value>,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerDecl>,
}

/// A server within a deployment. Either `apps` is given explicitly, or the
/// single-app shorthand (`addr`, `routers`, `published_services` at server
/// scope) is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerDecl {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub config_overrides: serde_json::Map<String, Value>,
    #[serde(default)]
    pub apps: Vec<AppDecl>,
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(default)]
    pub routers: Vec<String>,
    #[serde(default)]
    pub published_services: Vec<String>,
    #[serde(default)]
    pub client_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppDecl {
    pub addr: String,
    #[serde(default)]
    pub routers: Vec<String>,
    #[serde(default)]
    pub published_services: Vec<String>,
}

// ── built topology ──────────────────────────────────────────────────────

/// The compiled plan for one `deployment.server`.
#[derive(Debug, Clone)]
pub struct ServerTopology {
    /// Composite `deployment.server` key.
    pub key: String,
    pub deployment: String,
    pub server: String,
    pub base_url: String,
    pub config_overrides: serde_json::Map<String, Value>,
    pub apps: Vec<TopologyApp>,
    /// Union of published services across apps.
    pub services: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TopologyApp {
    pub addr: String,
    /// Declared routers plus one generated router per published service.
    pub routers: Vec<String>,
    pub published_services: Vec<String>,
}

// ── loading ─────────────────────────────────────────────────────────────

/// Load a full description into `registry`: configs (resolved), middleware
/// names, router declarations, service declarations, and topologies.
///
/// # Errors
///
/// Fatal at startup: config resolution failures, unknown middleware types,
/// and every [`build_topologies`] sanity-check failure.
pub fn load_description(registry: &Registry, spec: &DeploymentSpec) -> Result<()> {
    for (key, value) in &spec.configs {
        registry.set_config(key, value.clone());
    }
    registry.resolve_configs()?;

    for decl in &spec.middlewares {
        registry
            .middleware()
            .register_name(&decl.name, &decl.type_name, decl.config.clone())?;
    }

    for decl in &spec.routers {
        registry.declare_router(decl.clone());
    }

    for def in &spec.services {
        registry.declare_service(def.clone());
    }

    build_topologies(registry, spec)
}

/// Compile every `deployment.server` into a stored [`ServerTopology`] and
/// register its client-router entries.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for unresolvable router, service-type or
/// middleware references.
pub fn build_topologies(registry: &Registry, spec: &DeploymentSpec) -> Result<()> {
    for (deployment_name, deployment) in &spec.deployments {
        for (server_name, server) in &deployment.servers {
            let key = format!("{deployment_name}.{server_name}");
            let mut overrides = deployment.config_overrides.clone();
            for (k, v) in &server.config_overrides {
                overrides.insert(k.clone(), v.clone());
            }

            let apps = expand_apps(server);
            let mut services = Vec::new();
            for app in &apps {
                sanity_check_app(registry, &key, app)?;
                for svc in &app.published_services {
                    if !services.contains(svc) {
                        services.push(svc.clone());
                    }
                }
            }

            let base_url = server
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost".to_string());
            let timeout = server
                .client_timeout_secs
                .map_or(DEFAULT_TIMEOUT, std::time::Duration::from_secs);

            for app in &apps {
                for router_name in &app.routers {
                    registry.client_routers().register(ClientRouter {
                        router_name: router_name.clone(),
                        server_key: key.clone(),
                        base_url: base_url.clone(),
                        addr: app.addr.clone(),
                        is_local: false,
                        local: None,
                        timeout,
                    });
                }
            }

            registry.store_topology(ServerTopology {
                key: key.clone(),
                deployment: deployment_name.clone(),
                server: server_name.clone(),
                base_url,
                config_overrides: overrides,
                apps,
                services,
            });
            tracing::info!(topology = %key, "topology built");
        }
    }
    Ok(())
}

/// Expand the single-app shorthand and derive one auto-router name per
/// published service.
fn expand_apps(server: &ServerDecl) -> Vec<TopologyApp> {
    let decls: Vec<AppDecl> = if server.apps.is_empty() {
        match &server.addr {
            Some(addr) => vec![AppDecl {
                addr: addr.clone(),
                routers: server.routers.clone(),
                published_services: server.published_services.clone(),
            }],
            None => Vec::new(),
        }
    } else {
        server.apps.clone()
    };

    decls
        .into_iter()
        .map(|decl| {
            let mut routers = decl.routers.clone();
            for svc in &decl.published_services {
                let generated = service_router_name(svc);
                if !routers.contains(&generated) {
                    routers.push(generated);
                }
            }
            TopologyApp {
                addr: decl.addr,
                routers,
                published_services: decl.published_services,
            }
        })
        .collect()
}

fn sanity_check_app(registry: &Registry, key: &str, app: &TopologyApp) -> Result<()> {
    for svc in &app.published_services {
        let service_type = registry
            .service_def(svc)
            .map(|def| def.type_name)
            .unwrap_or_else(|| svc.clone());
        let st = registry
            .service_type(&service_type)
            .ok_or_else(|| Error::NotFound {
                kind: "service type",
                name: format!("{service_type} (published on {key})"),
            })?;
        if st.routing.is_none() {
            return Err(Error::Config {
                key: svc.clone(),
                reason: format!(
                    "published service has no routing metadata on type '{service_type}'"
                ),
            });
        }
    }

    for router_name in &app.routers {
        let derivable = app
            .published_services
            .iter()
            .any(|svc| service_router_name(svc) == *router_name);
        if !derivable && !registry.has_router(router_name) {
            return Err(Error::NotFound {
                kind: "router",
                name: format!("{router_name} (referenced by {key})"),
            });
        }
    }

    for decl in registry.router_decls() {
        if app.routers.contains(&decl.name) {
            for mw in &decl.middlewares {
                if !registry.middleware().has_name(mw) {
                    return Err(Error::NotFound {
                        kind: "middleware",
                        name: format!("{mw} (router '{}')", decl.name),
                    });
                }
            }
        }
    }
    Ok(())
}

// ── activation ──────────────────────────────────────────────────────────

/// Activate the topology under `key`: apply its config overrides, bind
/// every declared service to its local or remote factory, and project the
/// running client-router table.
///
/// # Errors
///
/// [`Error::NotFound`] for an unknown key, [`Error::FactoryMissing`] when a
/// service has no usable factory side.
pub fn set_current_server(registry: &Registry, key: &str) -> Result<()> {
    let topology = registry.topology(key).ok_or_else(|| Error::NotFound {
        kind: "topology",
        name: key.to_string(),
    })?;

    registry.config_store().apply_overrides(&topology.config_overrides);
    registry.resolve_configs()?;

    // where every published service lives within this deployment
    let mut homes: BTreeMap<String, String> = BTreeMap::new();
    for peer in registry.topologies() {
        if peer.deployment == topology.deployment {
            for svc in &peer.services {
                homes.entry(svc.clone()).or_insert_with(|| peer.key.clone());
            }
        }
    }

    let mut defs: Vec<ServiceDef> = registry.service_defs();
    for svc in homes.keys() {
        if !defs.iter().any(|d| &d.name == svc) {
            defs.push(ServiceDef {
                name: svc.clone(),
                type_name: svc.clone(),
                config: Value::Null,
                depends_on: std::collections::HashMap::new(),
            });
        }
    }

    for def in defs {
        bind_service(registry, &topology, &homes, &def)?;
    }

    registry.set_current_server_key(key);
    registry.client_routers().build_running(key);
    tracing::info!(server = %key, "current server selected");
    Ok(())
}

fn bind_service(
    registry: &Registry,
    topology: &ServerTopology,
    homes: &BTreeMap<String, String>,
    def: &ServiceDef,
) -> Result<()> {
    let service_type =
        registry
            .service_type(&def.type_name)
            .ok_or_else(|| Error::NotFound {
                kind: "service type",
                name: def.type_name.clone(),
            })?;

    let home = homes.get(&def.name);
    let wants_local = home.is_none() || home == Some(&topology.key);

    // a missing preferred side falls back to the other one, logged
    let (factory_side, local_binding) = if wants_local {
        if service_type.local.is_some() {
            ("local", true)
        } else {
            tracing::warn!(service = %def.name, "no local factory, using remote side");
            ("remote", false)
        }
    } else if service_type.remote.is_some() {
        ("remote", false)
    } else {
        tracing::warn!(service = %def.name, "no remote factory, using local side");
        ("local", true)
    };

    let type_name = def.type_name.clone();
    let name = def.name.clone();
    if local_binding {
        if service_type.local.is_none() {
            return Err(Error::FactoryMissing {
                name: def.name.clone(),
                side: "local",
            });
        }
        let reg_types = registry.service_type(&type_name);
        registry.register_lazy_service_with_deps(
            &def.name,
            crate::registry::ServiceFactory::full(move |deps, config| {
                let st = reg_types.as_ref().ok_or_else(|| Error::NotFound {
                    kind: "service type",
                    name: type_name.clone(),
                })?;
                let factory = st.local.as_ref().ok_or_else(|| Error::FactoryMissing {
                    name: name.clone(),
                    side: "local",
                })?;
                factory.call(deps, config)
            }),
            def.depends_on.clone(),
            def.config.clone(),
            ProvideMode::Override,
        );
        tracing::debug!(service = %def.name, side = factory_side, "service bound");
    } else {
        if service_type.remote.is_none() {
            return Err(Error::FactoryMissing {
                name: def.name.clone(),
                side: "remote",
            });
        }
        let mut config = match &def.config {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        config.insert(
            "router".to_string(),
            Value::String(service_router_name(&def.name)),
        );
        let reg_types = registry.service_type(&type_name);
        registry.register_lazy_service_with_deps(
            &def.name,
            crate::registry::ServiceFactory::full(move |deps, config| {
                let st = reg_types.as_ref().ok_or_else(|| Error::NotFound {
                    kind: "service type",
                    name: type_name.clone(),
                })?;
                let factory = st.remote.as_ref().ok_or_else(|| Error::FactoryMissing {
                    name: name.clone(),
                    side: "remote",
                })?;
                factory.call(deps, config)
            }),
            def.depends_on.clone(),
            Value::Object(config),
            ProvideMode::Override,
        );
        tracing::debug!(service = %def.name, side = factory_side, "service bound");
    }
    Ok(())
}

// ── router instantiation ────────────────────────────────────────────────

/// Build the concrete router instance for `router_name` within an app:
/// a clone of the registered definition configured by its declaration, or
/// a router generated from a published service's exposed method set.
///
/// # Errors
///
/// [`Error::NotFound`] when the name is neither registered nor derivable,
/// or when referenced middleware is missing; generation failures from
/// [`crate::router::autogen::generate_router`].
pub fn resolve_router_instance(
    registry: &Registry,
    router_name: &str,
    published_services: &[String],
) -> Result<Router> {
    let decl = registry.router_decl(router_name);

    if let Some(mut router) = registry.router(router_name) {
        if let Some(decl) = &decl {
            apply_router_decl(&mut router, decl)?;
        }
        return Ok(router);
    }

    let service = published_services
        .iter()
        .find(|svc| service_router_name(svc) == router_name)
        .ok_or_else(|| Error::NotFound {
            kind: "router",
            name: router_name.to_string(),
        })?;

    let def_type = registry
        .service_def(service)
        .map(|d| d.type_name)
        .unwrap_or_else(|| service.clone());
    let service_type = registry
        .service_type(&def_type)
        .ok_or_else(|| Error::NotFound {
            kind: "service type",
            name: def_type.clone(),
        })?;
    let metadata = service_type.routing.as_ref().ok_or_else(|| Error::Config {
        key: service.clone(),
        reason: "service type has no routing metadata".to_string(),
    })?;

    let instance = registry.services().resolve(service)?;
    let methods = instance.exposed_methods().ok_or_else(|| Error::Config {
        key: service.clone(),
        reason: "service instance does not expose its method set".to_string(),
    })?;

    let mut overrides = RouteOverride::default();
    if let Some(decl) = &decl {
        overrides.path_prefix = decl.path_prefix.clone();
        overrides.middlewares = decl
            .middlewares
            .iter()
            .map(|m| crate::middleware::MiddlewareSpec::named(m))
            .collect();
    }

    let mut router =
        crate::router::autogen::generate_router(router_name, methods, metadata, &overrides)?;
    if let Some(decl) = &decl {
        if !decl.path_rewrites.is_empty() {
            let rules: Vec<(String, String)> = decl
                .path_rewrites
                .iter()
                .map(|r| (r.pattern.clone(), r.replacement.clone()))
                .collect();
            router.set_path_rewrites(&rules)?;
        }
    }
    Ok(router)
}

fn apply_router_decl(router: &mut Router, decl: &RouterDecl) -> Result<()> {
    if let Some(prefix) = &decl.path_prefix {
        router.set_path_prefix(prefix);
    }
    if !decl.path_rewrites.is_empty() {
        let rules: Vec<(String, String)> = decl
            .path_rewrites
            .iter()
            .map(|r| (r.pattern.clone(), r.replacement.clone()))
            .collect();
        router.set_path_rewrites(&rules)?;
    }
    for mw in &decl.middlewares {
        router.use_middleware(crate::middleware::MiddlewareSpec::named(mw));
    }
    for custom in &decl.custom_routes {
        let mut options = RouteOptions::new();
        if let Some(method) = custom.method {
            options = options.method(method);
        }
        if let Some(path) = &custom.path {
            options = options.path(path);
        }
        if !custom.middlewares.is_empty() {
            options = options.middlewares(
                custom
                    .middlewares
                    .iter()
                    .map(|m| crate::middleware::MiddlewareSpec::named(m))
                    .collect(),
            );
        }
        router.update_route(&custom.name, options)?;
    }
    Ok(())
}
