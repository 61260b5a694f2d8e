//! Built-in pipeline stages.
//!
//! Middleware here is an ordinary [`Handler`](crate::Handler): it inspects
//! the request, decorates the response writer, and either answers itself or
//! hands over to the rest of the pipeline.
//!
//! - [`cors`]: cross-origin resource sharing

pub mod cors;
