//! Subcommand implementations
//!
//! Each command writes its user-facing output to the `out` writer it is
//! given (stdout in `main`) and logs through `tracing` on stderr.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use iap_auth::{
    AuthState, ClientRegistration, CredentialEngine, EngineOptions, FileTokenStore, InstallRequest,
    Installer, TokenRecord, TokenStore,
};
use iap_client::{IapClient, RequestOptions};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::login::{self, LoginOptions};

/// Load the client descriptor and stored tokens into an engine.
pub async fn open_engine(config: &Config) -> Result<Arc<CredentialEngine>> {
    let secrets_path = config.secrets_path()?;
    let registration = ClientRegistration::load(&secrets_path).with_context(|| {
        format!(
            "failed to load client descriptor from {}; run `iap-login configure` first",
            secrets_path.display()
        )
    })?;
    let store = FileTokenStore::new(config.token_path()?);
    let engine = CredentialEngine::initialize(
        registration,
        Arc::new(store),
        EngineOptions {
            scopes: config.scopes(),
            ..EngineOptions::default()
        },
    )
    .await;
    if let Some(err) = engine.last_error().await {
        warn!(error = %err, "stored tokens could not be read; sign in again");
    }
    Ok(Arc::new(engine))
}

/// `configure`: install the OAuth client descriptor.
pub fn configure(config: &Config, request: &InstallRequest, out: &mut impl Write) -> Result<PathBuf> {
    let installer = Installer::new(config.secrets_path()?);
    let path = installer
        .install(request)
        .context("failed to install client descriptor")?;
    writeln!(out, "Client descriptor installed at {}", path.display())?;
    Ok(path)
}

/// `login`: interactive sign-in.
pub async fn login(engine: &CredentialEngine, options: &LoginOptions, out: &mut impl Write) -> Result<()> {
    let record = login::run_login(engine, options).await?;
    match record.user_email {
        Some(ref email) => writeln!(out, "Signed in as {email}")?,
        None => writeln!(out, "Signed in")?,
    }
    Ok(())
}

/// Snapshot printed by `status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub signed_in: bool,
    pub token_file: PathBuf,
    pub user_email: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub expired: Option<bool>,
    pub seconds_remaining: Option<i64>,
    pub has_refresh_token: bool,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusReport {
    fn new(token_file: &Path, loaded: iap_auth::Result<Option<TokenRecord>>) -> Self {
        let mut report = Self {
            signed_in: false,
            token_file: token_file.to_path_buf(),
            user_email: None,
            expiry: None,
            expired: None,
            seconds_remaining: None,
            has_refresh_token: false,
            scopes: Vec::new(),
            error: None,
        };
        match loaded {
            Ok(Some(record)) => {
                report.signed_in = true;
                report.expired = Some(record.is_expired());
                report.seconds_remaining = Some(record.seconds_remaining());
                report.has_refresh_token = record.has_refresh_token();
                report.expiry = Some(record.expiry);
                report.user_email = record.user_email.clone();
                report.scopes = record.scopes.clone();
            }
            Ok(None) => {}
            Err(e) => report.error = Some(e.to_string()),
        }
        report
    }

    fn write_human(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "Token file: {}", self.token_file.display())?;
        if let Some(ref err) = self.error {
            writeln!(out, "Status:     unreadable ({err})")?;
            return Ok(());
        }
        if !self.signed_in {
            writeln!(out, "Status:     not signed in")?;
            return Ok(());
        }
        writeln!(
            out,
            "Status:     signed in as {}",
            self.user_email.as_deref().unwrap_or("(unknown user)")
        )?;
        if let (Some(expiry), Some(remaining)) = (self.expiry, self.seconds_remaining) {
            if self.expired == Some(true) {
                writeln!(out, "ID token:   expired at {}", expiry.to_rfc3339())?;
            } else {
                writeln!(out, "ID token:   valid until {} ({remaining}s left)", expiry.to_rfc3339())?;
            }
        }
        writeln!(
            out,
            "Refresh:    {}",
            if self.has_refresh_token { "available" } else { "none" }
        )?;
        writeln!(out, "Scopes:     {}", self.scopes.join(" "))?;
        Ok(())
    }
}

/// `status`: describe the stored tokens. Needs no client descriptor.
pub async fn status(config: &Config, json: bool, out: &mut impl Write) -> Result<StatusReport> {
    let token_file = config.token_path()?;
    let store = FileTokenStore::new(&token_file);
    let report = StatusReport::new(&token_file, store.load().await);
    if json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
    } else {
        report.write_human(out)?;
    }
    Ok(report)
}

/// `refresh`: run the refresh grant now.
pub async fn refresh(engine: &CredentialEngine, out: &mut impl Write) -> Result<()> {
    if engine.state().await == AuthState::Unauthenticated {
        bail!("not signed in; run `iap-login login` first");
    }
    let record = engine.refresh().await.context("token refresh failed")?;
    info!(user = ?record.user_email, "tokens refreshed");
    writeln!(out, "Tokens refreshed; valid until {}", record.expiry.to_rfc3339())?;
    Ok(())
}

/// `logout`: delete the stored tokens. Needs no client descriptor.
pub async fn logout(config: &Config, out: &mut impl Write) -> Result<()> {
    let token_file = config.token_path()?;
    let store = FileTokenStore::new(&token_file);
    let existed = store.exists().await;
    store
        .clear()
        .await
        .with_context(|| format!("failed to remove {}", token_file.display()))?;
    if existed {
        writeln!(out, "Signed out; removed {}", token_file.display())?;
    } else {
        writeln!(out, "Already signed out")?;
    }
    Ok(())
}

/// Arguments of the `request` command.
#[derive(Debug, Clone, Default)]
pub struct RequestArgs {
    pub method: String,
    pub target: String,
    pub data: Option<String>,
    pub headers: Vec<String>,
    pub base_url: Option<String>,
}

/// Parse `Name: value` header arguments.
fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let Some((name, value)) = entry.split_once(':') else {
            bail!("header {entry:?} must look like `Name: value`");
        };
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("invalid header name in {entry:?}"))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("invalid header value in {entry:?}"))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// `request`: one authenticated call; the body goes to `out`.
///
/// `engine` is optional so that a token file alone is enough to make
/// requests.
pub async fn request(
    config: &Config,
    engine: Option<Arc<CredentialEngine>>,
    args: &RequestArgs,
    out: &mut impl Write,
) -> Result<reqwest::StatusCode> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method {:?}", args.method))?;

    let mut options = RequestOptions {
        headers: parse_headers(&args.headers)?,
        ..RequestOptions::default()
    };
    if let Some(ref data) = args.data {
        let value: serde_json::Value =
            serde_json::from_str(data).context("--data must be valid JSON")?;
        options.json = Some(value);
    }

    let mut builder = IapClient::builder()
        .token_file(config.token_path()?)
        .timeout(config.http_timeout());
    if let Some(base_url) = args.base_url.as_ref().or(config.http.base_url.as_ref()) {
        builder = builder.base_url(base_url.clone());
    }
    if let Some(engine) = engine {
        builder = builder.engine(engine);
    }
    let client = builder.build()?;

    let response = client.request(method, &args.target, options).await?;
    let status = response.status();
    let body = response.bytes().await.context("failed to read response body")?;
    out.write_all(&body)?;
    if !body.is_empty() && !body.ends_with(b"\n") {
        writeln!(out)?;
    }
    client.close();

    if !status.is_success() {
        bail!("server returned {status}");
    }
    Ok(status)
}
