//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Every section is optional; running without a config file is the
//! common case. The client secret never lives here, only the path to the
//! installed descriptor.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var naming the config file.
pub const CONFIG_ENV: &str = "IAP_LOGIN_CONFIG";

/// Env var overriding `[http] base_url`.
pub const BASE_URL_ENV: &str = "IAP_LOGIN_BASE_URL";

/// Config file name under the per-user config directory.
pub const CONFIG_FILE: &str = "iap-login.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub storage: StorageConfig,
    pub login: LoginConfig,
    pub http: HttpConfig,
}

/// OAuth client settings
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client descriptor; defaults to the installed `client_secrets.json`.
    pub secrets_path: Option<PathBuf>,
    pub scopes: Option<Vec<String>>,
}

/// Token persistence settings
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub token_file: Option<PathBuf>,
}

/// Interactive sign-in settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// How long to wait for the browser redirect.
    pub timeout_secs: u64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_login_timeout(),
        }
    }
}

/// Settings for the `request` command
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_login_timeout() -> u64 {
    300
}

fn default_http_timeout() -> u64 {
    30
}

impl Config {
    /// Load the config named on the command line or by `IAP_LOGIN_CONFIG`,
    /// else the default file if it exists, else defaults.
    ///
    /// An explicitly named file must exist.
    pub fn resolve(cli_path: Option<&Path>) -> common::Result<Self> {
        if let Some(path) = Self::explicit_path(cli_path) {
            return Self::load(&path);
        }
        let path = Self::default_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            Self::from_toml_str("")
        }
    }

    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    fn from_toml_str(contents: &str) -> common::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;

        if let Ok(url) = std::env::var(BASE_URL_ENV)
            && !url.trim().is_empty()
        {
            config.http.base_url = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if let Some(ref url) = self.http.base_url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {url}"
            )));
        }

        if self.http.timeout_secs == 0 {
            return Err(common::Error::Config(
                "http.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.login.timeout_secs == 0 {
            return Err(common::Error::Config(
                "login.timeout_secs must be greater than 0".into(),
            ));
        }

        if let Some(ref scopes) = self.client.scopes
            && (scopes.is_empty() || scopes.iter().any(|s| s.trim().is_empty()))
        {
            return Err(common::Error::Config(
                "client.scopes must be a non-empty list of non-empty strings".into(),
            ));
        }

        Ok(())
    }

    /// Config path from CLI arg or `IAP_LOGIN_CONFIG`, if either is set.
    pub fn explicit_path(cli_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(p.to_path_buf());
        }
        std::env::var_os(CONFIG_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }

    pub fn default_path() -> common::Result<PathBuf> {
        Ok(common::paths::config_dir()?.join(CONFIG_FILE))
    }

    /// Client descriptor to load.
    pub fn secrets_path(&self) -> common::Result<PathBuf> {
        match self.client.secrets_path {
            Some(ref p) => Ok(p.clone()),
            None => common::paths::client_secrets_path(),
        }
    }

    /// Token file: configured path, then `IAP_AUTH_TOKEN_FILE`, then the
    /// standard location.
    pub fn token_path(&self) -> common::Result<PathBuf> {
        if let Some(ref p) = self.storage.token_file {
            return Ok(p.clone());
        }
        match common::paths::token_path_override() {
            Some(p) => Ok(p),
            None => common::paths::token_path(),
        }
    }

    pub fn scopes(&self) -> Vec<String> {
        self.client
            .scopes
            .clone()
            .unwrap_or_else(iap_auth::default_scopes)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login.timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}
