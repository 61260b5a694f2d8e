//! Response content returned by handlers.

use std::fmt;
use std::io::Cursor;
use std::pin::Pin;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::AsyncRead;

/// A value that can be marshaled to JSON.
///
/// Implemented for every `Serialize` type; it exists so [`Entity::Value`]
/// can hold any of them behind one pointer.
pub trait Marshal: Send + Sync {
    fn marshal(&self) -> serde_json::Result<Vec<u8>>;
}

impl<T: Serialize + Send + Sync> Marshal for T {
    fn marshal(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// What a handler hands back for the [`Responder`](crate::Responder) to
/// write. "No content" is `None` at the [`Outcome`](crate::Outcome) level.
pub enum Entity {
    /// Bytes read from `reader`, sent with the declared content type.
    Stream {
        content_type: String,
        reader: Pin<Box<dyn AsyncRead + Send>>,
    },
    /// JSON that is already encoded; written verbatim.
    RawJson(Bytes),
    /// Anything else, marshaled to JSON when the response is written.
    Value(Box<dyn Marshal>),
}

impl Entity {
    pub fn stream(content_type: impl Into<String>, reader: impl AsyncRead + Send + 'static) -> Self {
        Self::Stream { content_type: content_type.into(), reader: Box::pin(reader) }
    }

    /// An in-memory body with an explicit content type.
    pub fn bytes(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::stream(content_type, Cursor::new(body.into()))
    }

    pub fn raw_json(body: impl Into<Bytes>) -> Self {
        Self::RawJson(body.into())
    }

    pub fn json<T: Serialize + Send + Sync + 'static>(value: T) -> Self {
        Self::Value(Box::new(value))
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream { content_type, .. } => {
                f.debug_struct("Stream").field("content_type", content_type).finish_non_exhaustive()
            }
            Self::RawJson(b) => f.debug_tuple("RawJson").field(b).finish(),
            Self::Value(_) => f.write_str("Value(..)"),
        }
    }
}
