//! ID token discovery
//!
//! `TokenChain` asks each source in order; the first token wins:
//! 1. `EngineSource`: an explicitly supplied `CredentialEngine`
//! 2. `RegistrySource`: the process-wide credential handle
//! 3. `FileSource`: the token file (env override or default path)
//!
//! A source answers `Ok(Some(token))`, `Ok(None)` to fall through, or
//! `Err` to stop the chain. Only the explicit engine stops the chain: a
//! failed forced refresh there is reported, not papered over by a stale
//! token from a later source.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use iap_auth::{CredentialEngine, CredentialRegistry, FileTokenStore, TokenStore};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;

/// One place an ID token may come from.
pub trait TokenSource: Send + Sync {
    /// Label for logs.
    fn name(&self) -> &'static str;

    /// Produce a token, refreshing first when `force_refresh` is set and the
    /// source is able to.
    fn token(&self, force_refresh: bool) -> SourceFuture<'_>;
}

/// Tokens from an engine the caller handed in.
pub struct EngineSource {
    engine: Arc<CredentialEngine>,
}

impl EngineSource {
    pub fn new(engine: Arc<CredentialEngine>) -> Self {
        Self { engine }
    }
}

impl TokenSource for EngineSource {
    fn name(&self) -> &'static str {
        "engine"
    }

    fn token(&self, force_refresh: bool) -> SourceFuture<'_> {
        Box::pin(async move {
            if force_refresh {
                let record = self.engine.refresh().await.map_err(|e| Error::NoCredentials {
                    message: "explicit credential engine could not refresh".into(),
                    source: Some(e),
                })?;
                return Ok(Some(record.id_token.expose().clone()));
            }
            // Signed-out engines fall through to the shared sources.
            Ok(self
                .engine
                .credentials()
                .await
                .map(|record| record.id_token.expose().clone())
                .filter(|token| !token.is_empty()))
        })
    }
}

/// Tokens from the process-wide handle. Refreshes expired entries and
/// republishes the result; nothing is written to disk.
pub struct RegistrySource {
    registry: Arc<CredentialRegistry>,
    http: reqwest::Client,
}

impl RegistrySource {
    pub fn new(registry: Arc<CredentialRegistry>, http: reqwest::Client) -> Self {
        Self { registry, http }
    }
}

impl TokenSource for RegistrySource {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn token(&self, force_refresh: bool) -> SourceFuture<'_> {
        Box::pin(async move {
            let Some(current) = self.registry.current() else {
                return Ok(None);
            };
            if !force_refresh && !current.is_expired() {
                return Ok(Some(current.id_token().to_owned()));
            }
            match current.refreshed(&self.http).await {
                Ok(fresh) => {
                    let token = fresh.id_token().to_owned();
                    self.registry.publish(fresh);
                    Ok(Some(token))
                }
                Err(e) => {
                    warn!(error = %e, "shared credentials could not be refreshed");
                    Ok(None)
                }
            }
        })
    }
}

/// Tokens from the token file. Cannot refresh (no client identity), so an
/// expired or unreadable file contributes nothing.
pub struct FileSource {
    store: FileTokenStore,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: FileTokenStore::new(path),
        }
    }

    /// `IAP_AUTH_TOKEN_FILE` if set, else the default token path.
    pub fn from_env() -> Option<Self> {
        common::paths::token_path_override()
            .or_else(|| common::paths::token_path().ok())
            .map(Self::new)
    }

    pub fn path(&self) -> &std::path::Path {
        self.store.path()
    }
}

impl TokenSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn token(&self, _force_refresh: bool) -> SourceFuture<'_> {
        Box::pin(async move {
            match self.store.load().await {
                Ok(Some(record)) if !record.is_expired() => Ok(Some(record.id_token.expose().clone())
                    .filter(|token| !token.is_empty())),
                Ok(Some(_)) => {
                    debug!(path = %self.store.path().display(), "stored token has expired");
                    Ok(None)
                }
                Ok(None) => Ok(None),
                Err(e) => {
                    debug!(error = %e, "token file unusable");
                    Ok(None)
                }
            }
        })
    }
}

/// Ordered list of sources.
#[derive(Default)]
pub struct TokenChain {
    sources: Vec<Box<dyn TokenSource>>,
}

impl TokenChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: impl TokenSource + 'static) {
        self.sources.push(Box::new(source));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// First token any source yields.
    pub async fn resolve(&self, force_refresh: bool) -> Result<String> {
        for source in &self.sources {
            if let Some(token) = source.token(force_refresh).await? {
                debug!(source = source.name(), force_refresh, "resolved ID token");
                return Ok(token);
            }
        }
        Err(Error::no_credentials(
            "no valid credentials found; run `iap-login login` to sign in",
        ))
    }
}
