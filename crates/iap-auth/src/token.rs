//! Token endpoint round-trips
//!
//! Two form-encoded POSTs against the registration's token endpoint:
//! 1. `authorization_code` grant (completes a browser login)
//! 2. `refresh_token` grant
//!
//! Both send `client_secret`; this side of the exchange runs over a trusted
//! channel, unlike the browser step PKCE protects.

use serde::Deserialize;

use crate::constants::TOKEN_ENDPOINT_TIMEOUT;
use crate::error::{Error, Result};
use crate::registration::ClientRegistration;

/// Successful token endpoint response. Google returns the same shape for
/// both grants; refresh responses usually omit `refresh_token`.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds from now, not an absolute instant
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Space-separated scopes actually granted
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Clone, Copy)]
enum Grant {
    Exchange,
    Refresh,
}

impl Grant {
    fn error(self, message: String, source: Option<reqwest::Error>) -> Error {
        match self {
            Grant::Exchange => Error::Exchange { message, source },
            Grant::Refresh => Error::Refresh { message, source },
        }
    }
}

/// Trade an authorization code and its PKCE verifier for tokens.
///
/// Codes are single-use; callers must not retry with the same code.
pub async fn exchange_code(
    client: &reqwest::Client,
    registration: &ClientRegistration,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
) -> Result<TokenResponse> {
    let form = [
        ("client_id", registration.client_id()),
        ("client_secret", registration.client_secret().expose().as_str()),
        ("code", code),
        ("code_verifier", verifier),
        ("grant_type", "authorization_code"),
        ("redirect_uri", redirect_uri),
    ];
    post_token_request(client, registration.token_endpoint(), &form, Grant::Exchange).await
}

/// Obtain fresh tokens with a refresh token.
pub async fn refresh_grant(
    client: &reqwest::Client,
    registration: &ClientRegistration,
    refresh_token: &str,
) -> Result<TokenResponse> {
    let form = [
        ("client_id", registration.client_id()),
        ("client_secret", registration.client_secret().expose().as_str()),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ];
    post_token_request(client, registration.token_endpoint(), &form, Grant::Refresh).await
}

async fn post_token_request(
    client: &reqwest::Client,
    endpoint: &str,
    form: &[(&str, &str)],
    grant: Grant,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoint)
        .timeout(TOKEN_ENDPOINT_TIMEOUT)
        .form(form)
        .send()
        .await
        .map_err(|e| grant.error(format!("request to token endpoint failed: {e}"), Some(e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(grant.error(provider_message(status, &body), None));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| grant.error(format!("invalid token response: {e}"), Some(e)))
}

/// Human-readable text from a rejected token request: `error_description`
/// when present, alongside the `error` code.
fn provider_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: Some(code),
            error_description: Some(desc),
        }) => format!("{code}: {desc}"),
        Ok(ErrorBody {
            error: None,
            error_description: Some(desc),
        }) => desc,
        Ok(ErrorBody {
            error: Some(code),
            error_description: None,
        }) => code,
        _ if body.trim().is_empty() => format!("token endpoint returned {status}: Unknown error"),
        _ => format!("token endpoint returned {status}: {}", truncate(body, 200)),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
