//! Transport boundary to the gateway management API
//!
//! Defines the `Transport` trait that the device-flow and config engines use
//! for every round-trip. Implementations return the parsed JSON body on 2xx
//! and a structured `TransportError` otherwise. `HttpTransport` is the
//! reqwest-backed implementation; tests substitute in-memory doubles.

pub mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use http::HttpTransport;

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// Failure of a single management API call.
///
/// `Clone` because one fetch result may be handed to several coalesced
/// awaiters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, timeout, reset, or an unreadable response stream
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    /// 2xx response whose body is not JSON
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// HTTP status for server errors, `None` otherwise.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human readable message without the variant prefix.
    ///
    /// For server errors this is the message the server put in its body, which
    /// is what the presentation layer shows to the user.
    pub fn message(&self) -> &str {
        match self {
            TransportError::Network(msg) | TransportError::Decode(msg) => msg,
            TransportError::Server { message, .. } => message,
        }
    }

    /// Whether the request never produced an HTTP response.
    pub fn is_network(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

/// Result alias for transport calls.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Boxed future returned by `Transport` methods.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Request/response access to the management API.
///
/// Paths are relative to the implementation's base URL. Uses
/// `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// GET `path` with query parameters.
    fn get<'a>(&'a self, path: &'a str, query: &'a [(&'a str, &'a str)]) -> TransportFuture<'a>;

    /// POST `path` with an optional JSON body.
    fn post<'a>(&'a self, path: &'a str, body: Option<&'a Value>) -> TransportFuture<'a>;

    /// DELETE `path`. Empty responses resolve to `Value::Null`.
    fn delete<'a>(&'a self, path: &'a str) -> TransportFuture<'a>;
}
