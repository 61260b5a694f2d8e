//! Cross-origin resource sharing.
//!
//! [`Cors`] is a pipeline stage implementing the W3C CORS protocol:
//!
//! - **Preflight** (`OPTIONS`): the origin, the method named in
//!   `Access-Control-Request-Method` and every header named in
//!   `Access-Control-Request-Headers` must be allowed. On success the
//!   permission headers are written and the chain stops; on failure the
//!   request is rejected with `400`.
//! - **Actual request** (any other method): the origin and the request's
//!   own method must be allowed; permission headers are written and the
//!   rest of the pipeline runs.
//!
//! Origins and methods are compared case-insensitively. An allowed origin
//! may hold one `*` (`http://*.example.com`), matched by prefix and suffix.
//!
//! ```rust
//! use courier::middleware::cors::{Cors, CorsOptions};
//! use courier::Pipeline;
//!
//! let cors = Cors::new(CorsOptions {
//!     allowed_origins: vec!["https://*.example.com".into()],
//!     allowed_methods: vec!["GET".into(), "POST".into(), "DELETE".into()],
//!     allow_credentials: true,
//!     ..CorsOptions::default()
//! });
//! let pipeline = Pipeline::new().add(cors);
//! # assert_eq!(pipeline.len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
    ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, HeaderValue, ORIGIN, VARY,
};
use http::{Method, StatusCode};
use tracing::debug;

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxFuture, Handler, Outcome};
use crate::pipeline::Pipeline;
use crate::response::Response;

/// Custom origin check. When configured it alone decides which origins are
/// allowed.
pub type OriginPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Configuration for [`Cors`].
///
/// Empty lists fall back to defaults: every origin, `GET` and `POST`, and
/// the `Origin`, `Accept` and `Content-Type` headers.
#[derive(Clone, Default)]
pub struct CorsOptions {
    /// Origins allowed to make cross-origin requests. `"*"` anywhere in the
    /// list allows every origin; an entry may contain one `*` wildcard.
    pub allowed_origins: Vec<String>,
    /// Replaces `allowed_origins` when set.
    pub allow_origin_fn: Option<OriginPredicate>,
    pub allowed_methods: Vec<String>,
    /// Headers a preflight may ask for. `"*"` allows any header; `Origin` is
    /// always added.
    pub allowed_headers: Vec<String>,
    /// Headers the browser may expose to scripts.
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Seconds a preflight result may be cached; `0` omits the header.
    pub max_age: u32,
    /// Let successful preflights continue down the pipeline.
    pub options_passthrough: bool,
    /// Skip CORS entirely for requests without an `Origin` header.
    pub allow_ignore_cors: bool,
}

impl fmt::Debug for CorsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorsOptions")
            .field("allowed_origins", &self.allowed_origins)
            .field("allow_origin_fn", &self.allow_origin_fn.as_ref().map(|_| "<function>"))
            .field("allowed_methods", &self.allowed_methods)
            .field("allowed_headers", &self.allowed_headers)
            .field("exposed_headers", &self.exposed_headers)
            .field("allow_credentials", &self.allow_credentials)
            .field("max_age", &self.max_age)
            .field("options_passthrough", &self.options_passthrough)
            .field("allow_ignore_cors", &self.allow_ignore_cors)
            .finish()
    }
}

/// An allowed origin holding one `*`, split around it.
#[derive(Clone, Debug)]
struct Wildcard {
    prefix: String,
    suffix: String,
}

impl Wildcard {
    fn matches(&self, origin: &str) -> bool {
        origin.len() >= self.prefix.len() + self.suffix.len()
            && origin.starts_with(&self.prefix)
            && origin.ends_with(&self.suffix)
    }
}

#[derive(Clone)]
enum Origins {
    Any,
    Listed { exact: Vec<String>, wildcards: Vec<Wildcard> },
    Predicate(OriginPredicate),
}

/// The CORS pipeline stage. Build once, share across every request.
#[derive(Clone)]
pub struct Cors {
    origins: Origins,
    /// `None` allows any header.
    allowed_headers: Option<Vec<String>>,
    allowed_methods: Vec<String>,
    exposed_headers: Vec<String>,
    allow_credentials: bool,
    max_age: u32,
    options_passthrough: bool,
    allow_ignore_cors: bool,
}

impl Cors {
    pub fn new(options: CorsOptions) -> Self {
        let origins = match options.allow_origin_fn {
            Some(predicate) => Origins::Predicate(predicate),
            None => normalize_origins(&options.allowed_origins),
        };

        let allowed_headers = if options.allowed_headers.is_empty() {
            Some(vec!["Origin".into(), "Accept".into(), "Content-Type".into()])
        } else if options.allowed_headers.iter().any(|h| h == "*") {
            None
        } else {
            let mut headers: Vec<String> =
                options.allowed_headers.iter().map(|h| canonical_header_key(h)).collect();
            headers.push("Origin".into());
            Some(headers)
        };

        let allowed_methods = if options.allowed_methods.is_empty() {
            vec!["GET".into(), "POST".into()]
        } else {
            options.allowed_methods.iter().map(|m| m.to_ascii_uppercase()).collect()
        };

        Self {
            origins,
            allowed_headers,
            allowed_methods,
            exposed_headers: options.exposed_headers.iter().map(|h| canonical_header_key(h)).collect(),
            allow_credentials: options.allow_credentials,
            max_age: options.max_age,
            options_passthrough: options.options_passthrough,
            allow_ignore_cors: options.allow_ignore_cors,
        }
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        match &self.origins {
            Origins::Any => true,
            Origins::Predicate(allow) => allow(origin),
            Origins::Listed { exact, wildcards } => {
                let origin = origin.to_ascii_lowercase();
                exact.iter().any(|o| *o == origin) || wildcards.iter().any(|w| w.matches(&origin))
            }
        }
    }

    pub fn is_method_allowed(&self, method: &str) -> bool {
        if self.allowed_methods.is_empty() {
            return false;
        }
        let method = method.to_ascii_uppercase();
        method == Method::OPTIONS.as_str() || self.allowed_methods.iter().any(|m| *m == method)
    }

    /// `requested` must already be canonicalized.
    pub fn are_headers_allowed(&self, requested: &[String]) -> bool {
        match &self.allowed_headers {
            None => true,
            Some(allowed) => requested.iter().all(|h| allowed.contains(h)),
        }
    }

    fn preflight(&self, rsp: &mut Response, ctx: &Context) -> Result<(), Error> {
        // Caches must key preflight answers on all three probe inputs,
        // whatever the outcome.
        rsp.append_header(VARY, HeaderValue::from_static("Origin"));
        rsp.append_header(VARY, HeaderValue::from_static("Access-Control-Request-Method"));
        rsp.append_header(VARY, HeaderValue::from_static("Access-Control-Request-Headers"));

        let origin = origin_of(ctx).ok_or_else(|| reject(ctx, "No origin provided".into()))?;
        if !self.is_origin_allowed(origin) {
            return Err(reject(ctx, format!("Origin is not permitted: {origin}")));
        }

        let method = ctx.header(ACCESS_CONTROL_REQUEST_METHOD.as_str()).unwrap_or("");
        if !self.is_method_allowed(method) {
            return Err(reject(ctx, format!("Method is not permitted: {method}")));
        }

        let requested =
            parse_header_list(ctx.header(ACCESS_CONTROL_REQUEST_HEADERS.as_str()).unwrap_or(""));
        if !self.are_headers_allowed(&requested) {
            return Err(reject(ctx, format!("Headers not permitted: {}", requested.join(", "))));
        }

        rsp.insert_header(ACCESS_CONTROL_ALLOW_ORIGIN, header_value(origin)?);
        rsp.insert_header(ACCESS_CONTROL_ALLOW_METHODS, header_value(&method.to_ascii_uppercase())?);
        if !requested.is_empty() {
            rsp.insert_header(ACCESS_CONTROL_ALLOW_HEADERS, header_value(&requested.join(", "))?);
        }
        if self.allow_credentials {
            rsp.insert_header(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if self.max_age > 0 {
            rsp.insert_header(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(self.max_age));
        }
        Ok(())
    }

    fn actual(&self, rsp: &mut Response, ctx: &Context) -> Result<(), Error> {
        let origin = origin_of(ctx);
        if origin.is_none() && self.allow_ignore_cors {
            return Ok(());
        }

        rsp.append_header(VARY, HeaderValue::from_static("Origin"));
        let origin = origin.ok_or_else(|| reject(ctx, "No origin provided".into()))?;
        if !self.is_origin_allowed(origin) {
            return Err(reject(ctx, format!("Origin is not permitted: {origin}")));
        }
        let method = ctx.method().as_str();
        if !self.is_method_allowed(method) {
            return Err(reject(ctx, format!("Method is not permitted: {method}")));
        }

        rsp.insert_header(ACCESS_CONTROL_ALLOW_ORIGIN, header_value(origin)?);
        if !self.exposed_headers.is_empty() {
            rsp.insert_header(ACCESS_CONTROL_EXPOSE_HEADERS, header_value(&self.exposed_headers.join(", "))?);
        }
        if self.allow_credentials {
            rsp.insert_header(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        Ok(())
    }
}

impl Default for Cors {
    fn default() -> Self {
        Self::new(CorsOptions::default())
    }
}

impl Handler for Cors {
    fn serve<'a>(
        &'a self,
        rsp: &'a mut Response,
        ctx: &'a mut Context,
        next: Pipeline,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if ctx.method() == Method::OPTIONS {
                self.preflight(rsp, ctx)?;
                if !self.options_passthrough {
                    return Ok(None);
                }
            } else {
                self.actual(rsp, ctx)?;
            }
            next.dispatch(rsp, ctx).await
        })
    }
}

impl fmt::Debug for Cors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origins = match &self.origins {
            Origins::Any => "any".to_owned(),
            Origins::Predicate(_) => "<function>".to_owned(),
            Origins::Listed { exact, wildcards } => format!("{exact:?} + {wildcards:?}"),
        };
        f.debug_struct("Cors")
            .field("origins", &origins)
            .field("allowed_headers", &self.allowed_headers)
            .field("allowed_methods", &self.allowed_methods)
            .field("exposed_headers", &self.exposed_headers)
            .field("allow_credentials", &self.allow_credentials)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

fn normalize_origins(list: &[String]) -> Origins {
    if list.is_empty() {
        return Origins::Any;
    }
    let mut exact = Vec::new();
    let mut wildcards = Vec::new();
    for origin in list {
        let origin = origin.to_ascii_lowercase();
        if origin == "*" {
            return Origins::Any;
        }
        match origin.split_once('*') {
            Some((prefix, suffix)) => {
                wildcards.push(Wildcard { prefix: prefix.to_owned(), suffix: suffix.to_owned() })
            }
            None => exact.push(origin),
        }
    }
    Origins::Listed { exact, wildcards }
}

fn origin_of(ctx: &Context) -> Option<&str> {
    ctx.header(ORIGIN.as_str()).filter(|o| !o.is_empty())
}

fn reject(ctx: &Context, message: String) -> Error {
    debug!(id = %ctx.id(), method = %ctx.method(), path = ctx.path(), "cors: {message}");
    Error::status(StatusCode::BAD_REQUEST, message)
}

fn header_value(text: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(text).map_err(Error::opaque)
}

/// `content-type` → `Content-Type`. Keys with characters outside the
/// token set are returned unchanged.
pub fn canonical_header_key(key: &str) -> String {
    let valid = key.bytes().all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    if !valid {
        return key.to_owned();
    }
    let mut upper = true;
    key.chars()
        .map(|c| {
            let out = if upper { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() };
            upper = c == '-';
            out
        })
        .collect()
}

/// Splits a comma-separated header list into canonical header names.
fn parse_header_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(canonical_header_key)
        .collect()
}
