//! Request body for POST/PUT operations.

use bytes::Bytes;
use std::fmt;
use tokio::io::AsyncRead;

/// Request body for HTTP methods that send data.
#[derive(Default)]
pub enum RequestBody {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// Body with raw bytes.
    Bytes(Bytes),
    /// JSON document, serialized when the request is written.
    Json(serde_json::Value),
    /// Streamed upload of unknown length, sent with chunked framing.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            RequestBody::Json(v) => f.debug_tuple("Json").field(v).finish(),
            RequestBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Bytes(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(v))
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Bytes(Bytes::from(s.to_owned()))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Bytes(b)
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(v: serde_json::Value) -> Self {
        RequestBody::Json(v)
    }
}

impl RequestBody {
    /// Wrap a reader as a streamed upload.
    pub fn stream<R: AsyncRead + Send + Unpin + 'static>(reader: R) -> Self {
        RequestBody::Stream(Box::new(reader))
    }

    /// Check if the body is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// Whether the body can be sent again after a failed attempt.
    pub fn is_replayable(&self) -> bool {
        !matches!(self, RequestBody::Stream(_))
    }

    /// Take the body for sending, leaving a replayable copy in place.
    ///
    /// Streams cannot be copied: they move out and `Empty` is left behind.
    pub fn take_for_send(&mut self) -> RequestBody {
        match self {
            RequestBody::Empty => RequestBody::Empty,
            RequestBody::Bytes(b) => RequestBody::Bytes(b.clone()),
            RequestBody::Json(v) => RequestBody::Json(v.clone()),
            RequestBody::Stream(_) => std::mem::take(self),
        }
    }

    /// The encoded payload for in-memory bodies, `None` for streams.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            RequestBody::Empty => Some(Bytes::new()),
            RequestBody::Bytes(b) => Some(b.clone()),
            RequestBody::Json(v) => Some(Bytes::from(v.to_string())),
            RequestBody::Stream(_) => None,
        }
    }

    /// Get the length of the body in bytes, `None` for streams.
    pub fn len(&self) -> Option<usize> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(b) => Some(b.len()),
            RequestBody::Json(v) => Some(v.to_string().len()),
            RequestBody::Stream(_) => None,
        }
    }

    /// Default `Content-Type` for the body, if it implies one.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            RequestBody::Json(_) => Some("application/json"),
            _ => None,
        }
    }
}
