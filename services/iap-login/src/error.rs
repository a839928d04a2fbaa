//! Login flow errors

use thiserror::Error;

/// Ways an interactive sign-in ends without tokens.
///
/// Engine failures (exchange, storage) keep their `iap_auth::Error` so the
/// provider's message reaches the user unchanged.
#[derive(Error, Debug)]
pub enum Error {
    #[error("state mismatch on redirect, possible CSRF attack; sign-in aborted")]
    StateMismatch,

    #[error("authorization denied by provider: {0}")]
    Provider(String),

    #[error("no authorization code received within {0}s")]
    Timeout(u64),

    #[error("could not read an authorization code from input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Auth(#[from] iap_auth::Error),

    #[error("I/O error during sign-in: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
