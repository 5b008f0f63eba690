//! The handler contract.
//!
//! A handler consumes a [`Context`] and produces a [`Response`]. Plain
//! `async fn(Context) -> Result<Response>` functions implement [`Handler`]
//! through the blanket impl, so route registration takes functions directly.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    context::{Context, Response},
    Result,
};

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: Context) -> Result<Response>;
}

/// Shared, cheaply clonable handler reference used throughout route tables
/// and middleware chains.
pub type ArcHandler = Arc<dyn Handler>;

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    async fn call(&self, ctx: Context) -> Result<Response> {
        (self)(ctx).await
    }
}

/// Box a handler function into an [`ArcHandler`].
pub fn arc_handler<H: Handler>(handler: H) -> ArcHandler {
    Arc::new(handler)
}
