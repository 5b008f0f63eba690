//! # Application Error Handling

use axum::http::StatusCode;

use crate::context::ErrorDetail;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("config error for '{key}': {reason}")]
    Config { key: String, reason: String },

    #[error("circular config reference: {}", .chain.join(" -> "))]
    ConfigCycle { chain: Vec<String> },

    #[error("unknown config provider: '{0}'")]
    UnknownProvider(String),

    #[error("service type '{name}' has no {side} factory")]
    FactoryMissing { name: String, side: &'static str },

    #[error("circular service dependency: {}", .chain.join(" -> "))]
    ServiceCycle { chain: Vec<String> },

    #[error("{kind} not found: '{name}'")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} already registered: '{name}'")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("remote call via '{router}' returned {status}: {message}")]
    Remote {
        router: String,
        status: u16,
        code: String,
        message: String,
    },

    #[error("service '{name}' holds a different type than requested")]
    TypeMismatch { name: String },

    // API
    #[error("{0}")]
    Unauthorized(String),

    // API
    #[error("not found")]
    RouteNotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("")]
    CustomError(StatusCode, ErrorDetail),

    #[error("shutdown finished with {} error(s)", .0.len())]
    Shutdown(Vec<String>),

    #[error(transparent)]
    JSON(#[from] serde_json::Error),

    #[error(transparent)]
    YAML(#[from] serde_yaml::Error),

    #[error(transparent)]
    EnvVar(#[from] std::env::VarError),

    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Any(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap any displayable value into a [`Error::Message`].
    pub fn msg(err: impl std::fmt::Display) -> Self {
        Self::Message(err.to_string())
    }

    #[must_use]
    pub fn wrap(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Any(Box::new(err))
    }

    #[must_use]
    pub fn string(s: &str) -> Self {
        Self::Message(s.to_string())
    }

    /// The HTTP status this error maps to when it escapes a handler.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound | Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::CustomError(status, _) => *status,
            Self::Remote { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
