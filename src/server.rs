//! # Server lifecycle
//!
//! A [`Server`] groups apps, merges those sharing an address, runs one
//! listener per address, and shuts down gracefully: new requests get
//! `503 Retry-After: 5`, in-flight requests finish within the timeout,
//! listeners are then forced closed, and finally every service's shutdown
//! hook runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    app::App,
    listener::{AppEngine, Listener, TcpListener},
    registry::Registry,
    topology,
    Error, Result,
};

pub struct Server {
    name: String,
    registry: Arc<Registry>,
    apps: Vec<App>,
    engines: Vec<Arc<AppEngine>>,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<Result<()>>>,
}

impl Server {
    #[must_use]
    pub fn new(name: &str, registry: Arc<Registry>) -> Self {
        Self {
            name: name.to_string(),
            registry,
            apps: Vec::new(),
            engines: Vec::new(),
            shutdown: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    #[must_use]
    pub fn add_app(mut self, app: App) -> Self {
        self.apps.push(app);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Build a server from the topology under `key`: selects the server
    /// (binding services local or remote), instantiates every app's router
    /// chain, attaches local routers to their client-router entries, and
    /// projects the running table.
    ///
    /// # Errors
    ///
    /// Everything [`topology::set_current_server`] and
    /// [`topology::resolve_router_instance`] can fail with.
    pub fn from_topology(registry: Arc<Registry>, key: &str) -> Result<Self> {
        topology::set_current_server(&registry, key)?;
        let topo = registry.topology(key).ok_or_else(|| Error::NotFound {
            kind: "topology",
            name: key.to_string(),
        })?;

        if let Ok(log_config) = registry.get_config_as::<crate::logger::LogConfig>("logger") {
            crate::logger::init(&log_config, &topo.server);
        }

        let mut server = Self::new(&topo.server, registry.clone());
        for (idx, app_spec) in topo.apps.iter().enumerate() {
            let app_name = format!("{}-app{}", topo.server, idx + 1);
            let mut app = App::with_default_routes(&app_name, &app_spec.addr);
            for router_name in &app_spec.routers {
                let router = topology::resolve_router_instance(
                    &registry,
                    router_name,
                    &app_spec.published_services,
                )?;
                registry.client_routers().attach_local(
                    router_name,
                    key,
                    Arc::new(router.clone()),
                );
                app = app.add_router(router);
            }
            server = server.add_app(app);
        }

        // re-project now that local router instances exist
        registry.client_routers().build_running(key);
        Ok(server)
    }

    /// Merge apps sharing an address and start one listener per address.
    ///
    /// # Errors
    ///
    /// Returns the first bind failure.
    pub async fn start(&mut self) -> Result<()> {
        let apps = std::mem::take(&mut self.apps);
        let merged = merge_by_addr(apps);

        for mut app in merged {
            let Some(router) = app.take_router() else {
                tracing::warn!(app = %app.name(), "app has no routers, skipped");
                continue;
            };
            router.print_routes();

            let engine = Arc::new(AppEngine::new(
                app.name(),
                router,
                self.registry.clone(),
                self.shutdown.clone(),
            ));
            self.engines.push(engine.clone());

            let engine_name = app.listener_config().engine.clone();
            if engine_name != "tcp" {
                tracing::warn!(
                    app = %app.name(),
                    engine = %engine_name,
                    "unknown listener engine, falling back to tcp"
                );
            }
            let addr = app.addr().to_string();
            let shutdown = self.shutdown.clone();
            let handle = tokio::spawn(async move {
                TcpListener.serve(&addr, engine, shutdown).await
            });
            self.handles.push(handle);
        }

        tracing::info!(server = %self.name, listeners = self.handles.len(), "server started");
        Ok(())
    }

    /// Graceful shutdown. The drain window stays open until in-flight
    /// requests finish or `timeout` expires: listeners keep accepting and
    /// every new request is answered `503 Retry-After: 5`. Listeners are
    /// then stopped (force-closed past the timeout) and service shutdown
    /// hooks run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shutdown`] aggregating listener and service-hook
    /// failures; none of them are fatal individually.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        tracing::info!(server = %self.name, "shutting down");
        for engine in &self.engines {
            engine.start_draining();
        }

        let mut errors = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        while self.engines.iter().map(|e| e.in_flight()).sum::<usize>() > 0 {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(server = %self.name, "drain timeout, forcing close");
                errors.push("drain timed out with requests in flight".to_string());
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.shutdown.cancel();
        let mut handles = std::mem::take(&mut self.handles);
        let wind_down = futures_util::future::join_all(handles.iter_mut());
        let grace = deadline
            .saturating_duration_since(tokio::time::Instant::now())
            .max(Duration::from_millis(100));
        match tokio::time::timeout(grace, wind_down).await {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => errors.push(err.to_string()),
                        Err(join_err) if join_err.is_cancelled() => {}
                        Err(join_err) => errors.push(join_err.to_string()),
                    }
                }
            }
            Err(_) => {
                for handle in &handles {
                    handle.abort();
                }
                errors.push("listeners did not stop in time".to_string());
            }
        }

        errors.extend(self.registry.shutdown_services());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Shutdown(errors))
        }
    }
}

/// Concatenate the router chains of apps sharing an address; the first
/// app's name and position are kept.
fn merge_by_addr(apps: Vec<App>) -> Vec<App> {
    let mut merged: Vec<App> = Vec::new();
    let mut by_addr: HashMap<String, usize> = HashMap::new();

    for mut app in apps {
        match by_addr.get(app.addr()) {
            Some(&idx) => {
                if let Some(router) = app.take_router() {
                    match merged[idx].router_mut() {
                        Some(existing) => existing.append_chain(router),
                        None => merged[idx].put_router(router),
                    }
                }
                tracing::info!(
                    addr = %merged[idx].addr(),
                    merged_app = %app.name(),
                    "apps merged on shared address"
                );
            }
            None => {
                by_addr.insert(app.addr().to_string(), merged.len());
                merged.push(app);
            }
        }
    }
    merged
}
