//! Request context and response types.
//!
//! A handler receives a [`Context`] carrying everything about the incoming
//! request (method, path, params, query, headers, body, a request-scoped
//! value bag and a cancellation token) and returns a [`Response`]. The same
//! pair is used for in-process dispatch through a client router, so a local
//! call and a remote call share one shape.

use std::collections::HashMap;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// JSON error envelope returned for any framework-produced error response
/// and parsed back by the remote client.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorDetail {
    #[must_use]
    pub fn new<T: Into<String>>(code: T, message: T) -> Self {
        Self {
            code: Some(code.into()),
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn with_reason<T: Into<String>>(message: T) -> Self {
        Self {
            code: None,
            message: Some(message.into()),
        }
    }
}

/// Request-scoped context handed to handlers and middlewares.
#[derive(Debug, Clone)]
pub struct Context {
    method: Method,
    path: String,
    headers: HeaderMap,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Bytes,
    values: HashMap<String, serde_json::Value>,
    cancellation: CancellationToken,
    request_id: String,
}

impl Context {
    /// Create a context for the given method and path. The path may carry a
    /// query string, which is split off and parsed.
    #[must_use]
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p.to_string(), parse_query(q)),
            None => (path_and_query.to_string(), HashMap::new()),
        };
        Self {
            method,
            path,
            headers: HeaderMap::new(),
            params: HashMap::new(),
            query,
            body: Bytes::new(),
            values: HashMap::new(),
            cancellation: CancellationToken::new(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Self {
        self.body = serde_json::to_vec(value).unwrap_or_default().into();
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Rewrite tables and chain-prefix stripping adjust the path before the
    /// route table is consulted.
    pub(crate) fn set_path(&mut self, path: String) {
        self.path = path;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// A path parameter captured by the matched route pattern.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// A path parameter that must be present, or the request is malformed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] when the parameter was not captured.
    pub fn require_param(&self, name: &str) -> Result<&str> {
        self.param(name)
            .ok_or_else(|| Error::BadRequest(format!("missing path parameter '{name}'")))
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn query_map(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserialize the request body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] when the body is not valid JSON for `T`.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|err| Error::BadRequest(format!("invalid request body: {err}")))
    }

    /// Bind the query string onto a deserializable struct. Values are
    /// plain strings on the wire; numbers and booleans are coerced before
    /// binding so typed fields work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] when the parameters do not fit `T`.
    pub fn bind_query<T: DeserializeOwned>(&self) -> Result<T> {
        bind_string_map(&self.query)
            .map_err(|err| Error::BadRequest(format!("invalid query parameters: {err}")))
    }

    /// Bind the captured path parameters onto a deserializable struct,
    /// with the same coercion rules as [`bind_query`](Self::bind_query).
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] when the parameters do not fit `T`.
    pub fn bind_params<T: DeserializeOwned>(&self) -> Result<T> {
        bind_string_map(&self.params)
            .map_err(|err| Error::BadRequest(format!("invalid path parameters: {err}")))
    }

    /// Store a request-scoped value, visible to later middlewares and the
    /// handler.
    pub fn set_value(&mut self, key: &str, value: serde_json::Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Cancellation handle for this request. Signaled when the server shuts
    /// down; long-running dependent calls observe it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Deserialize a string map into `T`, coercing values that parse as
/// integers, floats or booleans so numeric struct fields bind.
fn bind_string_map<T: DeserializeOwned>(map: &HashMap<String, String>) -> serde_json::Result<T> {
    let object: serde_json::Map<String, serde_json::Value> = map
        .iter()
        .map(|(k, v)| (k.clone(), coerce_scalar(v)))
        .collect();
    serde_json::from_value(serde_json::Value::Object(object))
}

fn coerce_scalar(raw: &str) -> serde_json::Value {
    if let Ok(n) = raw.parse::<i64>() {
        return serde_json::Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return serde_json::Value::from(f);
    }
    match raw {
        "true" => serde_json::Value::Bool(true),
        "false" => serde_json::Value::Bool(false),
        other => serde_json::Value::String(other.to_string()),
    }
}

/// A buffered HTTP response: status, headers and a byte body.
///
/// Buffering keeps the local client-router dispatch a plain function call
/// that returns the recorded response, with no wire round-trip.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// A `200 OK` response with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns a serialization error when `value` cannot be encoded.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        let mut resp = Self::new(StatusCode::OK).with_body(body);
        resp.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(resp)
    }

    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        let mut resp = Self::new(StatusCode::OK).with_body(body.into().into_bytes());
        resp.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        resp
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Render an error as its JSON envelope with the mapped status code.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        let status = err.status_code();
        let detail = match err {
            Error::CustomError(_, detail) => detail.clone(),
            Error::Remote { code, message, .. } => {
                ErrorDetail::new(code.clone(), message.clone())
            }
            Error::RouteNotFound | Error::NotFound { .. } => {
                ErrorDetail::new("not_found".to_string(), err.to_string())
            }
            Error::BadRequest(msg) => ErrorDetail::new("bad_request".to_string(), msg.clone()),
            Error::Unauthorized(msg) => {
                ErrorDetail::new("unauthorized".to_string(), msg.clone())
            }
            other => ErrorDetail::new("internal".to_string(), other.to_string()),
        };
        let body = serde_json::to_vec(&detail).unwrap_or_default();
        let mut resp = Self::new(status).with_body(body);
        resp.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        resp
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserialize the response body as JSON.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error when the body is not valid JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

impl axum::response::IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let mut builder = axum::http::Response::builder().status(self.status);
        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers;
        }
        builder
            .body(axum::body::Body::from(self.body))
            .unwrap_or_else(|_| {
                axum::http::Response::new(axum::body::Body::from("response build failed"))
            })
    }
}
