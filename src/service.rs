//! Wiring transport requests through the pipeline.
//!
//! A [`Service`] is assembled at startup: service-wide handlers, route
//! groups ([`Scope`]s), an encoder. [`Service::build`] freezes it into an
//! [`App`], whose pipeline is the service handlers followed by route
//! dispatch as the final stage:
//!
//! ```text
//! request ─▶ Context (fresh id) ─▶ [service handlers…] ─▶ route ─▶ [scope handlers…] ─▶ handler
//!                                                                                         │
//! response ◀── Responder (unless finalized) ◀───────────── Outcome ◀────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::Method;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use regex::Regex;
use tracing::{debug, error};

use crate::config::Config;
use crate::context::{Attrs, Context};
use crate::error::{BoxError, Error};
use crate::handler::{BoxedHandler, Handler};
use crate::id::IdGenerator;
use crate::pipeline::Pipeline;
use crate::responder::{stamp_request_id, Encoder, JsonEncoder, Responder};
use crate::response::Response;
use crate::router::{Dispatch, Route, Router};

// ── Scope ─────────────────────────────────────────────────────────────────────

/// A group of routes under a common base path sharing a pipeline.
///
/// ```rust
/// use courier::{handler_fn, Entity, Scope};
/// use http::Method;
///
/// let audit = handler_fn(|rsp, ctx, next| Box::pin(async move {
///     ctx.set_attr("audited", true);
///     next.dispatch(rsp, ctx).await
/// }));
/// let get_user = handler_fn(|_rsp, ctx, _next| Box::pin(async move {
///     Ok(Some(Entity::json(ctx.param("id").map(str::to_owned))))
/// }));
///
/// let users = Scope::new("/users")
///     .with(audit)
///     .route(Method::GET, "/{id}", get_user);
/// ```
pub struct Scope {
    base: String,
    pipeline: Pipeline,
    routes: Vec<(Method, String, BoxedHandler, Attrs)>,
}

impl Scope {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into(), pipeline: Pipeline::new(), routes: Vec::new() }
    }

    /// Appends a handler to this scope's pipeline. It runs for every route
    /// registered on the scope, including ones registered before it.
    pub fn with(mut self, handler: impl Handler) -> Self {
        self.pipeline = self.pipeline.add(handler);
        self
    }

    pub fn route(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.route_with(method, path, handler, Attrs::new())
    }

    /// Registers a route whose attributes are merged into the request
    /// context before its pipeline runs.
    pub fn route_with(mut self, method: Method, path: &str, handler: impl Handler, attrs: Attrs) -> Self {
        let path = format!("{}{path}", self.base.trim_end_matches('/'));
        let handler: BoxedHandler = Arc::new(handler);
        self.routes.push((method, path, handler, attrs));
        self
    }
}

// ── Service ───────────────────────────────────────────────────────────────────

/// Service builder.
pub struct Service {
    config: Config,
    pipeline: Pipeline,
    router: Router,
    encoder: Arc<dyn Encoder>,
    ids: Option<IdGenerator>,
}

impl Service {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            pipeline: Pipeline::new(),
            router: Router::default(),
            encoder: Arc::new(JsonEncoder),
            ids: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Appends a handler that runs for every request, before routing.
    pub fn with(mut self, handler: impl Handler) -> Self {
        self.pipeline = self.pipeline.add(handler);
        self
    }

    /// Registers a route at the service root.
    pub fn route(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.mount(Scope::new("").route(method, path, handler))
    }

    /// Registers every route of `scope`, each behind the scope's pipeline.
    ///
    /// # Panics
    ///
    /// Panics on an invalid or duplicate route pattern.
    pub fn mount(mut self, scope: Scope) -> Self {
        for (method, path, handler, attrs) in scope.routes {
            let pipeline = scope.pipeline.add_shared(handler);
            self.router.insert(method, &path, Route { pipeline, attrs });
        }
        self
    }

    /// Replaces the default JSON encoder.
    pub fn encoder(mut self, encoder: impl Encoder) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    /// Uses `ids` to mint correlation ids instead of a fresh generator.
    pub fn ids(mut self, ids: IdGenerator) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Every registered route, in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &str)> {
        self.router.listing().iter().map(|(m, p)| (m, p.as_str()))
    }

    pub fn build(self) -> App {
        let mut responder = Responder::new(self.config.name.as_str(), self.encoder);
        if let Some(ua) = self.config.user_agent.as_deref() {
            match HeaderValue::from_str(ua) {
                Ok(ua) => responder = responder.with_user_agent(ua),
                Err(e) => error!(service = %self.config.name, "ignoring user agent {ua:?}: {e}"),
            }
        }
        let dispatch = Dispatch { router: Arc::new(self.router) };
        App {
            pipeline: self.pipeline.add(dispatch),
            responder,
            ids: self.ids.unwrap_or_default(),
            name: self.config.name.into(),
            trace: self.config.trace_patterns,
        }
    }
}

impl From<Service> for App {
    fn from(service: Service) -> Self {
        service.build()
    }
}

// ── App ───────────────────────────────────────────────────────────────────────

/// A built service, ready to answer requests. Shared by every connection.
pub struct App {
    pipeline: Pipeline,
    responder: Responder,
    ids: IdGenerator,
    name: Arc<str>,
    trace: Vec<Regex>,
}

impl App {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether requests to `path` are traced, and by which pattern.
    pub fn traced(&self, path: &str) -> Option<&Regex> {
        self.trace.iter().find(|re| re.is_match(path))
    }

    /// Handles one request end to end.
    pub async fn handle<B>(&self, req: http::Request<B>, peer: Option<SocketAddr>) -> http::Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let mut rsp = Response::new();
        let (head, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                // Nothing useful can be dispatched without the body.
                let ctx = Context::new(http::Request::from_parts(head, Bytes::new()), self.ids.next_id());
                let err = Error::Other(e.into());
                self.responder.respond(&mut rsp, &ctx, Err(err)).await;
                return rsp.into_inner();
            }
        };

        let mut ctx = Context::new(http::Request::from_parts(head, body), self.ids.next_id()).with_peer(peer);
        let trace = self.traced(ctx.path()).cloned();
        if let Some(pattern) = &trace {
            self.trace_request(&ctx, pattern);
        }

        let outcome = self.pipeline.dispatch(&mut rsp, &mut ctx).await;
        if ctx.is_finalized() {
            stamp_request_id(&mut rsp, &ctx);
            debug!(service = %self.name, id = %ctx.id(), elapsed = ?ctx.elapsed(), "{} {} (finalized)", ctx.method(), ctx.resource());
            return rsp.into_inner();
        }

        self.responder.respond(&mut rsp, &ctx, outcome).await;
        debug!(
            service = %self.name,
            id = %ctx.id(),
            peer = ctx.remote_addr().unwrap_or("-"),
            status = rsp.status().as_u16(),
            elapsed = ?ctx.elapsed(),
            "{} {}", ctx.method(), ctx.resource(),
        );
        if trace.is_some() {
            self.trace_response(&ctx, &rsp);
        }
        rsp.into_inner()
    }

    fn trace_request(&self, ctx: &Context, pattern: &Regex) {
        let id = ctx.id();
        debug!(service = %self.name, %id, trace = %pattern, "[{}] {} {}", ctx.remote_addr().unwrap_or("-"), ctx.method(), ctx.resource());
        for (name, value) in ctx.headers() {
            if *name == header::AUTHORIZATION {
                let count = ctx.headers().get_all(header::AUTHORIZATION).iter().count();
                debug!(service = %self.name, %id, "  < {name}: <{count} suppressed>");
            } else {
                debug!(service = %self.name, %id, "  < {name}: {}", String::from_utf8_lossy(value.as_bytes()));
            }
        }
        debug!(service = %self.name, %id, "  <");
        if !ctx.body().is_empty() {
            debug!(service = %self.name, %id, "  < {}", String::from_utf8_lossy(ctx.body()));
        }
        debug!(service = %self.name, %id, "  -");
    }

    fn trace_response(&self, ctx: &Context, rsp: &Response) {
        let id = ctx.id();
        let status = rsp.status();
        debug!(service = %self.name, %id, "  > {} {}", status.as_u16(), status.canonical_reason().unwrap_or(""));
        for (name, value) in rsp.headers() {
            debug!(service = %self.name, %id, "  > {name}: {}", String::from_utf8_lossy(value.as_bytes()));
        }
        debug!(service = %self.name, %id, "  >");
        if !rsp.body().is_empty() {
            debug!(service = %self.name, %id, "  > {}", String::from_utf8_lossy(rsp.body()));
        }
        debug!(service = %self.name, %id, "  #");
    }
}
