//! Config and filesystem errors shared across the workspace

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("no per-user config directory on this platform; set IAP_AUTH_CONFIG_DIR")]
    NoConfigDir,
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
