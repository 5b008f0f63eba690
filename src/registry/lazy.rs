//! Lazy service instances with single-flight creation.
//!
//! Every lazy binding owns a small state machine
//! (`Pending -> Building -> Ready | Failed`). The first caller builds;
//! concurrent callers on other threads block on the condvar until the build
//! settles. Re-entry on the same thread (a factory resolving its own
//! ancestor) is caught by a thread-local construction stack before any lock
//! is taken, which is what produces the `a -> b -> c -> a` diagnostic.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Condvar, Mutex, OnceLock};

use dashmap::DashMap;
use serde_json::Value;

use crate::{Error, Result};

use super::service::{DepsMap, ServiceFactory, ServiceHandle};

thread_local! {
    static BUILD_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// What to do when a registration collides with an existing name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvideMode {
    PanicIfExists,
    SkipIfExists,
    Override,
}

enum BuildState {
    Pending,
    Building,
    Ready(ServiceHandle),
    Failed(String),
}

struct LazyBinding {
    name: String,
    factory: ServiceFactory,
    deps: HashMap<String, String>,
    config: Value,
    state: Mutex<BuildState>,
    cond: Condvar,
}

/// Store of eager and lazy service instances.
#[derive(Default)]
pub struct ServiceRegistry {
    eager: DashMap<String, ServiceHandle>,
    lazy: DashMap<String, Arc<LazyBinding>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn occupied(&self, name: &str) -> bool {
        self.eager.contains_key(name) || self.lazy.contains_key(name)
    }

    /// Register an eager instance under `name`.
    ///
    /// # Panics
    ///
    /// Panics when the name is taken and `mode` is
    /// [`ProvideMode::PanicIfExists`].
    pub fn register(&self, name: &str, handle: ServiceHandle, mode: ProvideMode) {
        if self.occupied(name) {
            match mode {
                ProvideMode::PanicIfExists => {
                    panic!("service '{name}' already registered")
                }
                ProvideMode::SkipIfExists => return,
                ProvideMode::Override => {
                    self.lazy.remove(name);
                }
            }
        }
        self.eager.insert(name.to_string(), handle);
    }

    /// Bind `name` to a factory with no declared dependencies; the factory
    /// may still pull other services at build time through the registry.
    ///
    /// # Panics
    ///
    /// Same collision behavior as [`register`](Self::register).
    pub fn register_lazy(
        &self,
        name: &str,
        factory: ServiceFactory,
        config: Value,
        mode: ProvideMode,
    ) {
        self.register_lazy_with_deps(name, factory, HashMap::new(), config, mode);
    }

    /// Bind `name` to a factory with explicit dependencies. Each entry
    /// `deps[alias] = service_name` is resolved on first access and handed
    /// to the factory under `alias`.
    ///
    /// # Panics
    ///
    /// Same collision behavior as [`register`](Self::register).
    pub fn register_lazy_with_deps(
        &self,
        name: &str,
        factory: ServiceFactory,
        deps: HashMap<String, String>,
        config: Value,
        mode: ProvideMode,
    ) {
        if self.occupied(name) {
            match mode {
                ProvideMode::PanicIfExists => {
                    panic!("service '{name}' already registered")
                }
                ProvideMode::SkipIfExists => return,
                ProvideMode::Override => {
                    self.eager.remove(name);
                    self.lazy.remove(name);
                }
            }
        }
        self.lazy.insert(
            name.to_string(),
            Arc::new(LazyBinding {
                name: name.to_string(),
                factory,
                deps,
                config,
                state: Mutex::new(BuildState::Pending),
                cond: Condvar::new(),
            }),
        );
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.occupied(name)
    }

    /// Resolve `name` to its instance, building it on first access.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown name, [`Error::ServiceCycle`]
    /// when the dependency graph loops, or the factory's own error (sticky:
    /// later callers see the stored cause).
    pub fn resolve(&self, name: &str) -> Result<ServiceHandle> {
        if let Some(handle) = self.eager.get(name) {
            return Ok(handle.clone());
        }

        let binding = self
            .lazy
            .get(name)
            .map(|b| b.clone())
            .ok_or_else(|| Error::NotFound {
                kind: "service",
                name: name.to_string(),
            })?;

        if let Some(chain) = BUILD_STACK.with(|stack| {
            let stack = stack.borrow();
            stack.iter().position(|n| n == name).map(|pos| {
                let mut chain: Vec<String> = stack[pos..].to_vec();
                chain.push(name.to_string());
                chain
            })
        }) {
            return Err(Error::ServiceCycle { chain });
        }

        {
            let mut state = binding
                .state
                .lock()
                .expect("service state lock poisoned");
            loop {
                match &*state {
                    BuildState::Ready(handle) => return Ok(handle.clone()),
                    BuildState::Failed(cause) => {
                        return Err(Error::Message(format!(
                            "service '{name}' failed to build: {cause}"
                        )))
                    }
                    BuildState::Building => {
                        state = binding
                            .cond
                            .wait(state)
                            .expect("service state lock poisoned");
                    }
                    BuildState::Pending => {
                        *state = BuildState::Building;
                        break;
                    }
                }
            }
        }

        let result = self.build(&binding);

        let mut state = binding
            .state
            .lock()
            .expect("service state lock poisoned");
        match &result {
            Ok(handle) => {
                self.eager.insert(binding.name.clone(), handle.clone());
                *state = BuildState::Ready(handle.clone());
            }
            Err(err) => {
                *state = BuildState::Failed(err.to_string());
            }
        }
        binding.cond.notify_all();
        result
    }

    fn build(&self, binding: &LazyBinding) -> Result<ServiceHandle> {
        BUILD_STACK.with(|stack| stack.borrow_mut().push(binding.name.clone()));

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let mut deps = DepsMap::new();
            for (alias, dep_name) in &binding.deps {
                let dep = self.resolve(dep_name)?;
                deps.insert(alias.clone(), dep);
            }
            binding.factory.call(&deps, &binding.config)
        }));

        BUILD_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                let cause = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "factory panicked".to_string());
                Err(Error::Message(format!(
                    "factory for '{}' panicked: {cause}",
                    binding.name
                )))
            }
        }
    }

    /// Typed resolution.
    ///
    /// # Errors
    ///
    /// Adds [`Error::TypeMismatch`] on top of [`resolve`](Self::resolve)'s
    /// failures.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let handle = self.resolve(name)?;
        handle.downcast::<T>().ok_or_else(|| Error::TypeMismatch {
            name: name.to_string(),
        })
    }

    /// Typed resolution that swallows misses and mismatches.
    #[must_use]
    pub fn try_get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.resolve(name).ok()?.downcast::<T>()
    }

    /// Typed resolution for call sites that consider the service part of the
    /// process invariants.
    ///
    /// # Panics
    ///
    /// Panics on a missing name, a failed build or a type mismatch.
    #[must_use]
    pub fn must_get<T: Any + Send + Sync>(&self, name: &str) -> Arc<T> {
        match self.get::<T>(name) {
            Ok(v) => v,
            Err(err) => panic!("must_get('{name}'): {err}"),
        }
    }

    /// Invoke the shutdown hook of every built instance. Iterates a
    /// snapshot so no registry lock is held across hook work.
    #[must_use]
    pub fn shutdown_all(&self) -> Vec<String> {
        let snapshot: Vec<(String, ServiceHandle)> = self
            .eager
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut errors = Vec::new();
        for (name, handle) in snapshot {
            if let Some(hook) = handle.shutdown_hook() {
                if let Err(err) = hook.shutdown() {
                    tracing::error!(service = %name, error = %err, "service shutdown failed");
                    errors.push(format!("{name}: {err}"));
                }
            }
        }
        errors
    }
}

/// Per-dependency cache a handler can hold: resolves on first call, then
/// returns the cached instance. Thread-safe.
pub struct Cached<T> {
    name: String,
    cell: OnceLock<Arc<T>>,
}

impl<T: Any + Send + Sync> Cached<T> {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cell: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve (once) and return the cached instance.
    ///
    /// # Errors
    ///
    /// Same failures as [`ServiceRegistry::get`].
    pub fn get(&self, services: &ServiceRegistry) -> Result<Arc<T>> {
        if let Some(v) = self.cell.get() {
            return Ok(v.clone());
        }
        let v = services.get::<T>(&self.name)?;
        Ok(self.cell.get_or_init(|| v).clone())
    }
}
