//! Per-user config locations
//!
//! Everything lives under one directory: `<platform config dir>/iap-auth`
//! (`~/.config/iap-auth` on Linux), unless `IAP_AUTH_CONFIG_DIR` points
//! elsewhere.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Directory name under the platform config dir.
pub const APP_DIR_NAME: &str = "iap-auth";

/// Env var overriding the whole config directory.
pub const CONFIG_DIR_ENV: &str = "IAP_AUTH_CONFIG_DIR";

/// Env var naming an alternate token file for credential discovery.
pub const TOKEN_FILE_ENV: &str = "IAP_AUTH_TOKEN_FILE";

pub const CLIENT_SECRETS_FILE: &str = "client_secrets.json";
pub const TOKEN_FILE: &str = "tokens.json";

/// Resolve the application config directory.
pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::config_dir()
        .map(|base| base.join(APP_DIR_NAME))
        .ok_or(Error::NoConfigDir)
}

/// Standard location of the installed client descriptor.
pub fn client_secrets_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CLIENT_SECRETS_FILE))
}

/// Standard location of the durable token file.
pub fn token_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(TOKEN_FILE))
}

/// Token file named by `IAP_AUTH_TOKEN_FILE`, if set and non-empty.
pub fn token_path_override() -> Option<PathBuf> {
    std::env::var_os(TOKEN_FILE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
