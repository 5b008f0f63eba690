#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![doc = include_str!("../README.md")]

pub use self::errors::Error;

pub mod prelude;

pub mod app;
pub mod client_router;
pub mod config;
pub mod context;
pub mod environment;
pub mod errors;
pub mod format;
pub mod handler;
pub mod listener;
pub mod logger;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod server;
pub mod topology;
pub use async_trait;
pub use axum;

/// Application results options list
pub type Result<T, E = Error> = std::result::Result<T, E>;
