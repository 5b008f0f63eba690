// sugar for handlers to use `data!({"item": ..})` instead of `json!`
pub use serde_json::json as data;

pub use crate::{
    app::App,
    async_trait::async_trait,
    client_router::{CallArgs, ClientRequest, RemoteClient},
    config::ConfigProvider,
    context::{Context, Response},
    errors::Error,
    format,
    handler::{arc_handler, ArcHandler, Handler},
    middleware::MiddlewareSpec,
    registry::{
        Cached, ProvideMode, Registry, ServiceDef, ServiceFactory, ServiceHandle, ServiceType,
        Shutdown,
    },
    router::{
        autogen::{ConversionRule, ExposedService, RouteOverride, RoutingMetadata, ServiceMethod},
        Route, RouteMethod, RouteOptions, Router,
    },
    server::Server,
    topology::{self, DeploymentSpec},
    Result,
};
