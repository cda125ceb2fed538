//! Error types for device flow operations

use transport::TransportError;

/// Errors from device flow operations.
///
/// `Denied` and `Expired` are terminal outcomes reported by `wait_for_outcome`;
/// the user has to start a new flow to get a fresh code.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse {
        endpoint: &'static str,
        message: String,
    },

    #[error("authorization was denied")]
    Denied,

    #[error("authorization expired: {0}")]
    Expired(String),

    #[error("authorization failed: {0}")]
    Failed(String),

    #[error("device flow was reset before it completed")]
    Cancelled,
}

impl Error {
    /// Message suitable for the observable `error` field.
    ///
    /// Prefers the message the server put in its error body, then this
    /// error's own text, then `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        let message = match self {
            Error::Transport(e) => e.message().to_string(),
            other => other.to_string(),
        };
        if message.trim().is_empty() {
            fallback.to_string()
        } else {
            message
        }
    }
}

/// Result alias for device flow operations.
pub type Result<T> = std::result::Result<T, Error>;
