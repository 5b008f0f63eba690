//! Response shorthands for handlers.
//!
//! ```rust
//! use lokstra::{format, context::Context, Result, context::Response};
//!
//! async fn ping(_ctx: Context) -> Result<Response> {
//!     format::json(serde_json::json!({ "ok": true }))
//! }
//! ```

use axum::http::StatusCode;
use serde::Serialize;

use crate::{context::Response, Result};

/// Respond with a JSON body.
///
/// # Errors
///
/// Returns an error when serialization fails.
pub fn json<T: Serialize>(t: T) -> Result<Response> {
    Response::json(&t)
}

/// Respond with a plain-text body.
pub fn text(t: &str) -> Result<Response> {
    Ok(Response::text(t))
}

/// Respond with an empty body.
pub fn empty() -> Result<Response> {
    Ok(Response::empty())
}

/// Respond with a status code and no body.
pub fn status(status: StatusCode) -> Result<Response> {
    Ok(Response::new(status))
}
