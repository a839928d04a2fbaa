//! Client descriptor installation
//!
//! Writes `client_secrets.json` to the per-user config directory so
//! `ClientRegistration::load_default` finds it. The file holds the client
//! secret, so it is written owner-only.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::constants::{DEFAULT_REDIRECT_URI, GOOGLE_AUTH_URI, GOOGLE_CERT_URL, GOOGLE_TOKEN_URI};
use crate::error::{Error, Result, StorageErrorKind};
use crate::registration::ClientRegistration;

/// What to install. `source_path` wins when both forms are given.
#[derive(Debug, Default, Clone)]
pub struct InstallRequest {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub source_path: Option<PathBuf>,
    /// Recorded in the descriptor when installing from an id/secret pair.
    pub project_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Installer {
    dest: PathBuf,
}

impl Installer {
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self { dest: dest.into() }
    }

    /// Installer targeting `<config dir>/iap-auth/client_secrets.json`.
    pub fn at_default_location() -> Result<Self> {
        Ok(Self::new(Self::default_location()?))
    }

    pub fn default_location() -> Result<PathBuf> {
        common::paths::client_secrets_path()
            .map_err(|e| Error::storage(StorageErrorKind::Io, e.to_string()))
    }

    pub fn destination(&self) -> &Path {
        &self.dest
    }

    /// Validate and write a descriptor, returning where it went.
    pub fn install(&self, request: &InstallRequest) -> Result<PathBuf> {
        if let Some(source) = &request.source_path {
            return self.install_file(source);
        }
        match (&request.client_id, &request.client_secret) {
            (Some(id), Some(secret)) => {
                self.install_credentials(id, secret, request.project_id.as_deref())
            }
            _ => Err(Error::Validation(
                "provide either a client id and secret, or a client_secrets.json path".into(),
            )),
        }
    }

    /// Build a full "installed" descriptor around an id/secret pair.
    pub fn install_credentials(
        &self,
        client_id: &str,
        client_secret: &str,
        project_id: Option<&str>,
    ) -> Result<PathBuf> {
        let client_id = client_id.trim();
        let client_secret = client_secret.trim();
        if client_id.is_empty() {
            return Err(Error::Validation("client_id cannot be empty".into()));
        }
        if client_secret.is_empty() {
            return Err(Error::Validation("client_secret cannot be empty".into()));
        }

        let mut section = serde_json::json!({
            "client_id": client_id,
            "client_secret": client_secret,
            "auth_uri": GOOGLE_AUTH_URI,
            "token_uri": GOOGLE_TOKEN_URI,
            "auth_provider_x509_cert_url": GOOGLE_CERT_URL,
            "redirect_uris": [DEFAULT_REDIRECT_URI],
        });
        if let Some(project) = project_id.map(str::trim).filter(|p| !p.is_empty()) {
            section["project_id"] = serde_json::Value::from(project);
        }
        let document = serde_json::json!({ "installed": section });
        let contents = serde_json::to_string_pretty(&document)
            .map_err(|e| Error::Validation(format!("serializing descriptor: {e}")))?;

        self.write(contents.as_bytes())
    }

    /// Validate an existing descriptor and copy it byte-for-byte.
    pub fn install_file(&self, source: &Path) -> Result<PathBuf> {
        if !source.exists() {
            return Err(Error::NotFound(format!(
                "client secrets file not found: {}",
                source.display()
            )));
        }
        let contents = std::fs::read_to_string(source).map_err(|e| {
            Error::storage(StorageErrorKind::Io, format!("reading {}: {e}", source.display()))
        })?;
        ClientRegistration::from_json(&contents).map_err(|e| match e {
            Error::Format(msg) => Error::Validation(format!("{}: {msg}", source.display())),
            other => other,
        })?;

        self.write(contents.as_bytes())
    }

    fn write(&self, contents: &[u8]) -> Result<PathBuf> {
        let io = |what: &str, e: std::io::Error| {
            Error::storage(
                StorageErrorKind::Io,
                format!("{what} {}: {e}", self.dest.display()),
            )
        };
        if let Some(parent) = self.dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io("creating directory for", e))?;
        }
        std::fs::write(&self.dest, contents).map_err(|e| io("writing", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(crate::constants::SECURE_FILE_MODE);
            std::fs::set_permissions(&self.dest, perms).map_err(|e| io("restricting", e))?;
        }

        info!(path = %self.dest.display(), "installed client secrets");
        Ok(self.dest.clone())
    }
}
