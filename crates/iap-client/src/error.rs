//! Error types for authenticated requests

/// Errors from `IapClient`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller input the client cannot act on (relative path without a base
    /// URL, malformed base URL). Raised before any network call.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No discovery source produced a usable ID token.
    #[error("no credentials: {message}")]
    NoCredentials {
        message: String,
        #[source]
        source: Option<iap_auth::Error>,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response from one of the JSON helpers.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid JSON response: {0}")]
    Decode(String),
}

impl Error {
    pub(crate) fn no_credentials(message: impl Into<String>) -> Self {
        Error::NoCredentials {
            message: message.into(),
            source: None,
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
