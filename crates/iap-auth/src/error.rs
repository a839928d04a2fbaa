//! Error types for credential operations

use std::fmt;

/// Why a storage operation failed.
///
/// "No record present" is not an error; `load()` returns `Ok(None)` for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Disk or permission failure
    Io,
    /// The token file is not valid JSON
    InvalidJson,
    /// Valid JSON, but a required field is missing or has the wrong type
    MissingField,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StorageErrorKind::Io => "I/O failure",
            StorageErrorKind::InvalidJson => "invalid JSON",
            StorageErrorKind::MissingField => "missing required field",
        };
        f.write_str(label)
    }
}

/// Errors from credential operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad or missing input; never retried.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Client descriptor (or installer source) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Client descriptor exists but has the wrong shape.
    #[error("invalid client descriptor: {0}")]
    Format(String),

    /// Authorization-code exchange failed. Codes are single-use, so this is
    /// never retried automatically.
    #[error("token exchange failed: {message}")]
    Exchange {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Refresh-token grant failed or no refresh token is available.
    #[error("token refresh failed: {message}")]
    Refresh {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("token storage error ({kind}): {message}")]
    Storage {
        kind: StorageErrorKind,
        message: String,
    },

    /// No discovery source produced a usable token.
    #[error("no credentials: {0}")]
    NoCredentials(String),
}

impl Error {
    pub(crate) fn exchange(message: impl Into<String>) -> Self {
        Error::Exchange {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn refresh(message: impl Into<String>) -> Self {
        Error::Refresh {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn storage(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Error::Storage {
            kind,
            message: message.into(),
        }
    }

    /// Storage failure kind, if this is a storage error.
    pub fn storage_kind(&self) -> Option<StorageErrorKind> {
        match self {
            Error::Storage { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
