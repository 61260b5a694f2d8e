//! # courier
//!
//! Request dispatch for HTTP services: composable handler pipelines,
//! correlation ids, CORS, and a responder that turns handler results into
//! JSON (or HTML for browsers).
//!
//! ## The model
//!
//! Every request gets a [`Context`] with a fresh time-based
//! [`CorrelationId`]. The context travels down a [`Pipeline`] of
//! [`Handler`]s. Each handler may answer, fail, or call the rest of the
//! pipeline. Whatever comes back (an [`Entity`], nothing, or an [`Error`])
//! is written by the [`Responder`], which stamps `X-Request-Id` on the way
//! out.
//!
//! TLS, rate limiting and body-size limits belong to the proxy in front.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use courier::middleware::cors::{Cors, CorsOptions};
//! use courier::{handler_fn, Config, Entity, Error, Scope, Server, Service};
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let config = Config::from_env()?;
//!     let server = Server::from_config(&config)?;
//!
//!     let users = Scope::new("/users")
//!         .route(Method::GET, "/{id}", handler_fn(|_rsp, ctx, _next| Box::pin(async move {
//!             let id = ctx.param("id").unwrap_or_default().to_owned();
//!             Ok(Some(Entity::json(serde_json::json!({ "id": id }))))
//!         })));
//!
//!     let service = Service::new(config)
//!         .with(Cors::new(CorsOptions::default()))
//!         .mount(users);
//!
//!     server.serve(service).await
//! }
//! ```

mod config;
mod context;
mod entity;
mod error;
mod handler;
mod id;
mod pipeline;
mod responder;
mod response;
mod router;
mod server;
mod service;

pub mod middleware;

pub use config::Config;
pub use context::{Attrs, Context};
pub use entity::{Entity, Marshal};
pub use error::{BoxError, Error, StatusError};
pub use handler::{handler_fn, BoxFuture, BoxedHandler, Handler, HandlerFn, Outcome};
pub use id::{CorrelationId, IdGenerator, ParseIdError, Variant};
pub use pipeline::Pipeline;
pub use responder::{Encoder, JsonEncoder, Responder, X_REQUEST_ID};
pub use response::{ContentType, Response};
pub use server::Server;
pub use service::{App, Scope, Service};
