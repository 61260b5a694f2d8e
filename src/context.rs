//! Per-request context.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use http::header::{self, HeaderMap};
use http::{Method, Uri};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Error;
use crate::id::CorrelationId;

/// Caller-supplied request attributes, keyed by name.
pub type Attrs = HashMap<String, Value>;

/// One inbound request as seen by the pipeline.
///
/// Owns the transport request (head plus fully read body) together with the
/// request's [`CorrelationId`], an attribute bag that handlers and route
/// registrations may add to, the instant the request arrived, and the
/// one-way *finalized* flag.
#[derive(Debug)]
pub struct Context {
    head: http::request::Parts,
    body: Bytes,
    id: CorrelationId,
    attrs: Attrs,
    params: HashMap<String, String>,
    remote_addr: Option<String>,
    started: SystemTime,
    clock: Instant,
    finalized: bool,
}

impl Context {
    pub fn new(req: http::Request<Bytes>, id: CorrelationId) -> Self {
        let (head, body) = req.into_parts();
        Self {
            head,
            body,
            id,
            attrs: Attrs::new(),
            params: HashMap::new(),
            remote_addr: None,
            started: SystemTime::now(),
            clock: Instant::now(),
            finalized: false,
        }
    }

    /// Records the client address, preferring proxy headers
    /// (`X-Forwarded-For`, then `X-Origin-IP`) over the socket peer.
    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.remote_addr = self
            .header("x-forwarded-for")
            .or_else(|| self.header("x-origin-ip"))
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
            .or_else(|| peer.map(|p| p.to_string()));
        self
    }

    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    pub fn uri(&self) -> &Uri {
        &self.head.uri
    }

    pub fn path(&self) -> &str {
        self.head.uri.path()
    }

    /// Path plus query string, as it should appear in logs.
    pub fn resource(&self) -> String {
        match self.head.uri.query() {
            Some(q) if !q.is_empty() => format!("{}?{q}", self.path()),
            _ => self.path().to_owned(),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// First value of a header, if present and valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The request body, or a 400 when the request carries none.
    pub fn entity(&self) -> Result<&Bytes, Error> {
        if self.body.is_empty() {
            return Err(Error::bad_request("An entity is expected but the request has no body"));
        }
        Ok(&self.body)
    }

    /// Decodes the JSON request body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let data = self.entity()?;
        serde_json::from_slice(data)
            .map_err(|e| Error::bad_request(format!("Could not unmarshal request entity: {e}")))
    }

    /// A path parameter captured by the route pattern.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attrs.insert(key.into(), value.into());
    }

    /// Merges `attrs` into the bag; existing keys are overwritten, other
    /// keys are kept.
    pub fn merge_attrs<'a>(&mut self, attrs: impl IntoIterator<Item = (&'a String, &'a Value)>) {
        for (k, v) in attrs {
            self.attrs.insert(k.clone(), v.clone());
        }
    }

    /// Wall-clock time the request arrived.
    pub fn started(&self) -> SystemTime {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    /// Claims the response: the handler has written everything it wants
    /// sent, so no default response is generated. Cannot be undone.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Whether the client's `Accept` header explicitly lists `media`
    /// (or its `type/*` range). A bare `*/*` does not count, nor does a
    /// range the client refuses with `q=0`.
    pub fn accepts(&self, media: &str) -> bool {
        let range = media.split_once('/').map(|(t, _)| format!("{t}/*"));
        self.head
            .headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|item| {
                let mut parts = item.split(';').map(str::trim);
                let name = parts.next().unwrap_or("");
                let listed = name.eq_ignore_ascii_case(media)
                    || range.as_deref().is_some_and(|r| name.eq_ignore_ascii_case(r));
                listed && !parts.any(refuses)
            })
    }
}

/// `q=0` (or `0.0`, `0.000`) marks a media range as not acceptable.
fn refuses(param: &str) -> bool {
    let Some((key, value)) = param.split_once('=') else { return false };
    key.trim().eq_ignore_ascii_case("q")
        && value.trim().parse::<f32>().is_ok_and(|q| q <= 0.0)
}
