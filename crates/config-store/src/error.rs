use transport::TransportError;

/// Errors from config fetches and edits.
///
/// `Clone` because a single fetch result is shared by every coalesced caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("config document is not usable: {0}")]
    InvalidDocument(String),

    #[error("invalid value for {section}: {message}")]
    InvalidValue { section: String, message: String },

    /// The background fetch task died before producing a result
    #[error("config fetch aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// Message recorded in the observable `error` field.
    pub fn user_message(&self) -> String {
        let message = match self {
            Error::Transport(e) => e.message().to_string(),
            other => other.to_string(),
        };
        if message.trim().is_empty() {
            "Failed to fetch config".to_string()
        } else {
            message
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
