//! Authenticated HTTP client
//!
//! Every request carries `Authorization: Bearer <id token>`, resolved
//! through the `TokenChain`. A 401 triggers one forced-refresh resolution
//! and exactly one retry; if that resolution fails the original 401 is
//! returned rather than an error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use iap_auth::{CredentialEngine, CredentialRegistry};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::source::{EngineSource, FileSource, RegistrySource, TokenChain};
use crate::telemetry;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request extras. `json` wins over `body` when both are set.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Merged into the request; an `Authorization` entry is replaced.
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub json: Option<serde_json::Value>,
    /// Overrides the client's default timeout.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn json(value: serde_json::Value) -> Self {
        Self {
            json: Some(value),
            ..Self::default()
        }
    }
}

#[derive(Default)]
pub struct IapClientBuilder {
    base_url: Option<String>,
    engine: Option<Arc<CredentialEngine>>,
    registry: Option<Arc<CredentialRegistry>>,
    token_file: Option<PathBuf>,
    timeout: Option<Duration>,
    http: Option<reqwest::Client>,
}

impl IapClientBuilder {
    /// Prefix for relative paths; a trailing slash is dropped.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// First discovery source; its refresh failures are not masked.
    pub fn engine(mut self, engine: Arc<CredentialEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Registry for the second source (process-wide one by default).
    pub fn registry(mut self, registry: Arc<CredentialRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Token file for the third source. Without it, `IAP_AUTH_TOKEN_FILE`
    /// or the default token path is used.
    pub fn token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<IapClient> {
        let base_url = self.base_url.map(|raw| normalize_base_url(&raw)).transpose()?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(Error::Validation("timeout must be greater than 0".into()));
        }
        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder().build()?,
        };

        let mut tokens = TokenChain::new();
        if let Some(engine) = self.engine {
            tokens.push(EngineSource::new(engine));
        }
        let registry = self.registry.unwrap_or_else(CredentialRegistry::global);
        tokens.push(RegistrySource::new(registry, http.clone()));
        let file = match self.token_file {
            Some(path) => Some(FileSource::new(path)),
            None => FileSource::from_env(),
        };
        if let Some(file) = file {
            debug!(path = %file.path().display(), "token file source");
            tokens.push(file);
        }

        Ok(IapClient {
            http,
            base_url,
            timeout,
            tokens,
        })
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = url::Url::parse(trimmed)
        .map_err(|e| Error::Validation(format!("invalid base URL {raw:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => Err(Error::Validation(format!(
            "base URL must use http or https, got {other}"
        ))),
    }
}

/// HTTP client for IAP-protected services.
///
/// Dropping the client (or calling `close`) releases its connection pool.
pub struct IapClient {
    http: reqwest::Client,
    base_url: Option<String>,
    timeout: Duration,
    tokens: TokenChain,
}

impl std::fmt::Debug for IapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IapClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("sources", &self.tokens.len())
            .finish()
    }
}

impl IapClient {
    pub fn builder() -> IapClientBuilder {
        IapClientBuilder::default()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Resolve an ID token without sending anything.
    pub async fn resolve_token(&self, force_refresh: bool) -> Result<String> {
        self.tokens.resolve(force_refresh).await
    }

    /// Absolute http(s) URLs pass through; anything else is joined to the
    /// base URL.
    pub fn build_url(&self, path: &str) -> Result<String> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_string());
        }
        match &self.base_url {
            Some(base) => Ok(format!("{base}/{}", path.trim_start_matches('/'))),
            None => Err(Error::Validation(format!(
                "relative path {path:?} requires a base URL; configure one or pass an absolute URL"
            ))),
        }
    }

    /// Send an authenticated request, retrying once on 401.
    pub async fn request(&self, method: Method, path: &str, options: RequestOptions) -> Result<Response> {
        let url = self.build_url(path)?;
        let token = self.tokens.resolve(false).await?;
        let response = self.send(&method, &url, &token, &options).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let token = match self.tokens.resolve(true).await {
            Ok(token) => token,
            Err(e) => {
                debug!(error = %e, %url, "forced refresh failed; returning 401");
                telemetry::record_retry(false);
                return Ok(response);
            }
        };
        info!(%method, %url, "401 from server; retrying with refreshed token");
        telemetry::record_retry(true);
        self.send(&method, &url, &token, &options).await
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        token: &str,
        options: &RequestOptions,
    ) -> Result<Response> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::Validation("ID token is not a valid header value".into()))?;
        bearer.set_sensitive(true);
        let mut headers = options.headers.clone();
        headers.insert(AUTHORIZATION, bearer);

        let mut builder = self
            .http
            .request(method.clone(), url)
            .headers(headers)
            .timeout(options.timeout.unwrap_or(self.timeout));
        if let Some(json) = &options.json {
            builder = builder.json(json);
        } else if let Some(body) = &options.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        telemetry::record_request(response.status().as_u16());
        debug!(%method, url, status = response.status().as_u16(), "request complete");
        Ok(response)
    }

    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::GET, path, options).await
    }

    pub async fn post(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::POST, path, options).await
    }

    pub async fn put(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::PUT, path, options).await
    }

    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::DELETE, path, options).await
    }

    pub async fn patch(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::PATCH, path, options).await
    }

    /// GET and decode a JSON body; non-2xx is an error.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.get(path, RequestOptions::default()).await?;
        decode_json(response).await
    }

    /// POST a JSON body and decode the JSON reply; non-2xx is an error.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let value = serde_json::to_value(body)
            .map_err(|e| Error::Validation(format!("request body is not serializable: {e}")))?;
        let response = self.post(path, RequestOptions::json(value)).await?;
        decode_json(response).await
    }

    /// Release the connection pool.
    pub fn close(self) {
        debug!("closing client");
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| Error::Decode(e.to_string()))
}
