//! Service types, factories and the type-erased service handle.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    router::autogen::{ExposedService, RoutingMetadata, ServiceMethod},
    Error, Result,
};

/// Hook invoked for a service instance when the process shuts down.
pub trait Shutdown: Send + Sync {
    /// Release the service's resources.
    ///
    /// # Errors
    ///
    /// Failures are logged and aggregated, never fatal.
    fn shutdown(&self) -> Result<()>;
}

/// A type-erased, shared service instance.
///
/// The value is held as `Arc<dyn Any + Send + Sync>` and downcast on read
/// (the heterogeneous-map pattern); an optional [`Shutdown`] hook is
/// captured at construction so teardown needs no downcasting.
#[derive(Clone)]
pub struct ServiceHandle {
    value: Arc<dyn Any + Send + Sync>,
    shutdown: Option<Arc<dyn Shutdown>>,
    exposed: Option<Arc<dyn ExposedService>>,
}

impl ServiceHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            shutdown: None,
            exposed: None,
        }
    }

    /// Wrap a service that wants its [`Shutdown`] hook called at teardown.
    pub fn with_shutdown<T: Any + Send + Sync + Shutdown>(value: T) -> Self {
        let arc = Arc::new(value);
        Self {
            value: arc.clone(),
            shutdown: Some(arc),
            exposed: None,
        }
    }

    /// Wrap a service whose method set feeds router auto-generation.
    pub fn with_exposed<T: Any + Send + Sync + ExposedService>(value: T) -> Self {
        let arc = Arc::new(value);
        Self {
            value: arc.clone(),
            shutdown: None,
            exposed: Some(arc),
        }
    }

    /// Wrap a service that is both exposed and shutdown-aware.
    pub fn with_shutdown_and_exposed<T>(value: T) -> Self
    where
        T: Any + Send + Sync + Shutdown + ExposedService,
    {
        let arc = Arc::new(value);
        Self {
            value: arc.clone(),
            shutdown: Some(arc.clone()),
            exposed: Some(arc),
        }
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            shutdown: None,
            exposed: None,
        }
    }

    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    /// The method set for router generation, when the service exposes one.
    #[must_use]
    pub fn exposed_methods(&self) -> Option<Vec<ServiceMethod>> {
        self.exposed.as_ref().map(|e| e.methods())
    }

    pub(crate) fn shutdown_hook(&self) -> Option<Arc<dyn Shutdown>> {
        self.shutdown.clone()
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("has_shutdown", &self.shutdown.is_some())
            .finish()
    }
}

/// Resolved dependencies handed to a [`ServiceFactory::Full`] factory,
/// keyed by the local alias declared in the dependency map.
pub type DepsMap = HashMap<String, ServiceHandle>;

/// The accepted factory shapes, canonicalized at the call site: every shape
/// is invoked as `(deps, config)` and the narrower shapes ignore what they
/// do not take.
pub enum ServiceFactory {
    NoArg(Box<dyn Fn() -> Result<ServiceHandle> + Send + Sync>),
    ConfigOnly(Box<dyn Fn(&Value) -> Result<ServiceHandle> + Send + Sync>),
    Full(Box<dyn Fn(&DepsMap, &Value) -> Result<ServiceHandle> + Send + Sync>),
}

impl ServiceFactory {
    pub fn no_arg(f: impl Fn() -> Result<ServiceHandle> + Send + Sync + 'static) -> Self {
        Self::NoArg(Box::new(f))
    }

    pub fn from_config(
        f: impl Fn(&Value) -> Result<ServiceHandle> + Send + Sync + 'static,
    ) -> Self {
        Self::ConfigOnly(Box::new(f))
    }

    pub fn full(
        f: impl Fn(&DepsMap, &Value) -> Result<ServiceHandle> + Send + Sync + 'static,
    ) -> Self {
        Self::Full(Box::new(f))
    }

    /// Invoke through the canonical `(deps, config)` shape.
    ///
    /// # Errors
    ///
    /// Propagates whatever the factory returns.
    pub fn call(&self, deps: &DepsMap, config: &Value) -> Result<ServiceHandle> {
        match self {
            Self::NoArg(f) => f(),
            Self::ConfigOnly(f) => f(config),
            Self::Full(f) => f(deps, config),
        }
    }
}

impl std::fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match self {
            Self::NoArg(_) => "NoArg",
            Self::ConfigOnly(_) => "ConfigOnly",
            Self::Full(_) => "Full",
        };
        write!(f, "ServiceFactory::{shape}")
    }
}

/// Bind a factory's config value onto a typed struct.
///
/// # Errors
///
/// Returns [`Error::Config`] naming the offending shape mismatch.
pub fn bind_config<C: DeserializeOwned>(config: &Value) -> Result<C> {
    serde_json::from_value(config.clone()).map_err(|err| Error::Config {
        key: "factory config".to_string(),
        reason: err.to_string(),
    })
}

/// A registered service type: a name, up to two factories, and optional
/// routing metadata for auto-generated routers.
pub struct ServiceType {
    pub name: String,
    pub local: Option<ServiceFactory>,
    pub remote: Option<ServiceFactory>,
    pub routing: Option<RoutingMetadata>,
}

impl ServiceType {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            local: None,
            remote: None,
            routing: None,
        }
    }

    #[must_use]
    pub fn local(mut self, factory: ServiceFactory) -> Self {
        self.local = Some(factory);
        self
    }

    #[must_use]
    pub fn remote(mut self, factory: ServiceFactory) -> Self {
        self.remote = Some(factory);
        self
    }

    #[must_use]
    pub fn routing(mut self, metadata: RoutingMetadata) -> Self {
        self.routing = Some(metadata);
        self
    }

    /// Check the "at least one factory" invariant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FactoryMissing`] when neither side is present.
    pub fn validate(&self) -> Result<()> {
        if self.local.is_none() && self.remote.is_none() {
            return Err(Error::FactoryMissing {
                name: self.name.clone(),
                side: "local or remote",
            });
        }
        Ok(())
    }
}

/// A service declaration from the deployment description: an instance name,
/// its type, a config value, and optional dependency aliases.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ServiceDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub depends_on: HashMap<String, String>,
}
