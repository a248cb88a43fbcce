//! Error types.

use core::fmt;

use tokio_rustls::rustls;

use crate::body::ExceptionDetail;

/// Per-frame decode errors.
///
/// These are signaling, never fatal: the reader loop drops the offending
/// frame and keeps consuming the stream.
#[derive(Debug)]
pub enum DecodeError {
    /// The line is not valid JSON or lacks the minimal envelope shape.
    Json(serde_json::Error),
    /// The header named a body type this client has no shape for.
    UnimplementedBodyType(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "invalid message: {e}"),
            Self::UnimplementedBodyType(t) => write!(f, "unimplemented body type: {t}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::UnimplementedBodyType(_) => None,
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Operation-level errors surfaced to callers of the client.
#[derive(Debug)]
pub enum LeapError {
    /// Socket-level failure (dial, read, write).
    Io(std::io::Error),
    /// TLS configuration or handshake failure.
    Tls(rustls::Error),
    /// The ca/key/cert bundle handed over by pairing is unusable.
    Identity(String),
    /// Request serialization failure.
    Encode(serde_json::Error),
    /// The connection was lost while the request was in flight.
    Disconnected,
    /// No response arrived for the tag within the request timeout.
    Timeout { tag: String },
    /// A new request reused this tag while the original was still in flight.
    TagClobbered { tag: String },
    /// The pending-request table is at capacity.
    TooManyInFlight { limit: usize },
    /// A retrieve got a response without a body to unwrap.
    NoBody { url: String },
    /// A retrieve got an exception-detail body instead of the resource.
    Exception(ExceptionDetail),
}

impl fmt::Display for LeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Tls(e) => write!(f, "TLS error: {e}"),
            Self::Identity(msg) => write!(f, "bad client identity: {msg}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Disconnected => write!(f, "connection lost"),
            Self::Timeout { tag } => write!(f, "request {tag} timed out"),
            Self::TagClobbered { tag } => write!(f, "tag {tag} reused while in flight"),
            Self::TooManyInFlight { limit } => {
                write!(f, "too many in-flight requests (limit {limit})")
            }
            Self::NoBody { url } => write!(f, "response for {url} carried no body"),
            Self::Exception(d) => write!(f, "bridge exception: {}", d.message),
        }
    }
}

impl std::error::Error for LeapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Tls(e) => Some(e),
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LeapError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<rustls::Error> for LeapError {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e)
    }
}

impl From<serde_json::Error> for LeapError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encode(e)
    }
}
