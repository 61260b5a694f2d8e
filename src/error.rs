//! Unified error type.
//!
//! Handlers fail with [`Error`]. Only the [`Error::Status`] variant carries
//! a client-facing status code; everything else is opaque and is answered
//! with `500 Internal Server Error`.

use std::fmt;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

/// Any error a handler can wrap as the cause of a failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by handlers and by courier's own fallible
/// operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A failure with an explicit status code.
    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid address: {0}")]
    Addr(#[from] std::net::AddrParseError),

    #[error("invalid trace pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("{0}")]
    Other(BoxError),
}

impl Error {
    /// Structured error with a plain-text cause.
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status(StatusError::msg(status, message))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::status(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::status(StatusCode::NOT_FOUND, message)
    }

    /// Wraps any error as an opaque failure.
    pub fn opaque(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }

    /// The structured part of this error, if it has one.
    pub fn as_status(&self) -> Option<&StatusError> {
        match self {
            Self::Status(e) => Some(e),
            _ => None,
        }
    }
}

// ── StatusError ───────────────────────────────────────────────────────────────

/// A failure that maps onto a specific HTTP status.
///
/// ```rust
/// use courier::{Error, StatusError};
/// use http::StatusCode;
///
/// let err: Error = StatusError::msg(StatusCode::CONFLICT, "user 42 already exists")
///     .with_header(http::header::RETRY_AFTER, http::HeaderValue::from_static("5"))
///     .into();
/// assert_eq!(err.to_string(), "user 42 already exists");
/// ```
#[derive(Debug)]
pub struct StatusError {
    status: StatusCode,
    headers: HeaderMap,
    cause: Option<BoxError>,
}

impl StatusError {
    pub fn new(status: StatusCode, cause: impl Into<BoxError>) -> Self {
        Self { status, headers: HeaderMap::new(), cause: Some(cause.into()) }
    }

    pub fn msg(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status, message.into())
    }

    /// An error with no cause; its message is the canonical reason phrase.
    pub fn bare(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), cause: None }
    }

    /// Adds a header to the response this error turns into.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => fmt::Display::fmt(cause, f),
            None => f.write_str(self.status.canonical_reason().unwrap_or("")),
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}
