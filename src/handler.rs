//! Handler trait and the function adapter.
//!
//! # Dispatch protocol
//!
//! A handler is given the response writer, the request [`Context`] and the
//! *rest* of the pipeline. It then does one of three things:
//!
//! ```text
//! ┌────────────┐  returns Ok(Some(entity)) / Err(e)   → chain ends, Responder writes it
//! │  handler   │  awaits next.dispatch(rsp, ctx)     → later handlers run
//! └────────────┘  ctx.finalize() + returns           → chain ends, nothing else written
//! ```
//!
//! The continuation is an owned [`Pipeline`] value. Cloning or slicing it is
//! one `Arc` increment, so handing the tail to every stage costs nothing
//! compared to network I/O.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::entity::Entity;
use crate::error::Error;
use crate::pipeline::Pipeline;
use crate::response::Response;

/// A heap-allocated, type-erased future borrowing for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a dispatch produces: content to encode, nothing (`Ok(None)`), or a
/// failure.
pub type Outcome = Result<Option<Entity>, Error>;

/// A shared, type-erased handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// One stage of a [`Pipeline`].
///
/// Implement it on your own types for stateful stages (see
/// [`Cors`](crate::middleware::cors::Cors)); use [`handler_fn`] for
/// closures.
pub trait Handler: Send + Sync + 'static {
    fn serve<'a>(
        &'a self,
        rsp: &'a mut Response,
        ctx: &'a mut Context,
        next: Pipeline,
    ) -> BoxFuture<'a, Outcome>;

    /// Lets [`Pipeline::add`] splice pipelines in element by element.
    #[doc(hidden)]
    fn as_pipeline(&self) -> Option<&Pipeline> {
        None
    }
}

/// Turns a closure into a [`Handler`].
///
/// ```rust
/// use courier::{handler_fn, Entity, Pipeline};
///
/// let stamp = handler_fn(|rsp, ctx, next| Box::pin(async move {
///     ctx.set_attr("stamped", true);
///     next.dispatch(rsp, ctx).await
/// }));
/// let hello = handler_fn(|_rsp, _ctx, _next| Box::pin(async move {
///     Ok(Some(Entity::json("hello")))
/// }));
///
/// let pipeline = Pipeline::new().add(stamp).add(hello);
/// assert_eq!(pipeline.len(), 2);
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Response, &'a mut Context, Pipeline) -> BoxFuture<'a, Outcome>
        + Send
        + Sync
        + 'static,
{
    HandlerFn(f)
}

/// A closure wrapped as a [`Handler`]. Built by [`handler_fn`].
pub struct HandlerFn<F>(F);

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Response, &'a mut Context, Pipeline) -> BoxFuture<'a, Outcome>
        + Send
        + Sync
        + 'static,
{
    fn serve<'a>(
        &'a self,
        rsp: &'a mut Response,
        ctx: &'a mut Context,
        next: Pipeline,
    ) -> BoxFuture<'a, Outcome> {
        (self.0)(rsp, ctx, next)
    }
}
