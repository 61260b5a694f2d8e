//! The response writer handed to every handler.
//!
//! A [`Response`] is created empty for each request and passed down the
//! pipeline. Handlers decorate it (CORS adds its headers here) and the
//! [`Responder`](crate::Responder) later fills in status and body. A handler
//! that wants to answer on its own writes the whole response here and calls
//! [`Context::finalize`](crate::Context::finalize); the writer is then sent
//! exactly as the handler left it.

use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content types courier writes itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Html, // text/html; charset=utf-8
    Json, // application/json
    Text, // text/plain; charset=utf-8
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Json => "application/json",
            Self::Text => "text/plain; charset=utf-8",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response under construction.
///
/// ```rust
/// use courier::{ContentType, Response};
/// use http::StatusCode;
///
/// let mut rsp = Response::new();
/// rsp.set_status(StatusCode::CREATED);
/// rsp.append_header(http::header::LOCATION, http::HeaderValue::from_static("/users/42"));
/// rsp.write(ContentType::Json, r#"{"id":42}"#);
/// ```
#[derive(Debug, Default)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// `200 OK`, no headers, empty body.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Replaces every value of `name` with `value`.
    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Adds `value` without touching existing values of `name`.
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Sets the body and its content type.
    pub fn write(&mut self, content_type: ContentType, body: impl Into<Bytes>) {
        self.write_raw(HeaderValue::from_static(content_type.as_str()), body);
    }

    /// Sets the body with a caller-supplied content type.
    pub fn write_raw(&mut self, content_type: HeaderValue, body: impl Into<Bytes>) {
        self.headers.insert(header::CONTENT_TYPE, content_type);
        self.body = body.into();
    }

    /// Drops the body and content type, keeping status and other headers.
    pub(crate) fn clear_body(&mut self) {
        self.headers.remove(header::CONTENT_TYPE);
        self.body = Bytes::new();
    }

    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut rsp = http::Response::new(Full::new(self.body));
        *rsp.status_mut() = self.status;
        *rsp.headers_mut() = self.headers;
        rsp
    }
}
