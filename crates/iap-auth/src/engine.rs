//! Credential lifecycle
//!
//! `CredentialEngine` drives one user's tokens through
//!
//! ```text
//! Unauthenticated --begin_authorization--> Authorizing
//! Authorizing     --exchange_code ok-----> Authenticated
//! Authenticated   --refresh err----------> RefreshFailed (record kept)
//! RefreshFailed   --refresh ok-----------> Authenticated
//! any             --clear----------------> Unauthenticated
//! ```
//!
//! Every successful exchange or refresh updates memory first, then the
//! process-wide registry, then the token store.
//!
//! State sits behind a tokio mutex that is held across token endpoint
//! calls, so concurrent refreshes on one engine serialize instead of
//! racing. Concurrent authorization attempts are still unsupported: a
//! second `begin_authorization` replaces the pending verifier.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::constants::default_scopes;
use crate::error::{Error, Result};
use crate::pkce::{self, AuthorizationParams, PkcePair};
use crate::record::TokenRecord;
use crate::registration::ClientRegistration;
use crate::registry::{CredentialRegistry, SharedCredentials};
use crate::store::TokenStore;
use crate::telemetry::{self, Outcome};
use crate::token;

/// Lifecycle phase of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authorizing,
    Authenticated,
    /// The last refresh failed; the previous record is still held.
    RefreshFailed,
}

/// Optional collaborators for `CredentialEngine::initialize`.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Requested scopes; `openid email profile` by default.
    pub scopes: Vec<String>,
    /// Shared HTTP client for token endpoint calls.
    pub http: Option<reqwest::Client>,
    /// Registry to publish into; the process-wide one by default.
    pub registry: Option<Arc<CredentialRegistry>>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            scopes: default_scopes(),
            http: None,
            registry: None,
        }
    }
}

/// Result of `begin_authorization`: the URL to open in a browser and the
/// verifier to hand back to `exchange_code`.
#[derive(Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub verifier: String,
    pub redirect_uri: String,
    pub state: Option<String>,
}

impl std::fmt::Debug for AuthorizationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationRequest")
            .field("url", &self.url)
            .field("verifier", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Debug)]
struct EngineState {
    phase: AuthState,
    record: Option<TokenRecord>,
    pending: Option<PkcePair>,
    last_error: Option<String>,
}

impl EngineState {
    fn settled_phase(&self) -> AuthState {
        if self.record.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        }
    }
}

pub struct CredentialEngine {
    registration: ClientRegistration,
    store: Arc<dyn TokenStore>,
    scopes: Vec<String>,
    http: reqwest::Client,
    registry: Arc<CredentialRegistry>,
    state: Mutex<EngineState>,
}

impl std::fmt::Debug for CredentialEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEngine")
            .field("client_id", &self.registration.client_id())
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl CredentialEngine {
    /// Build an engine and adopt any record already in `store`.
    ///
    /// No network I/O. A stored record (even an expired one) makes the
    /// engine `Authenticated` and is published to the registry. Load
    /// failures are not returned: they are kept in `last_error()` and the
    /// engine starts `Unauthenticated`.
    pub async fn initialize(
        registration: ClientRegistration,
        store: Arc<dyn TokenStore>,
        options: EngineOptions,
    ) -> Self {
        let EngineOptions {
            scopes,
            http,
            registry,
        } = options;
        let registry = registry.unwrap_or_else(CredentialRegistry::global);

        let mut state = EngineState {
            phase: AuthState::Unauthenticated,
            record: None,
            pending: None,
            last_error: None,
        };
        match store.load().await {
            Ok(Some(record)) => {
                info!(user = ?record.user_email, expired = record.is_expired(), "loaded stored tokens");
                registry.publish(SharedCredentials {
                    registration: registration.clone(),
                    record: record.clone(),
                });
                state.record = Some(record);
                state.phase = AuthState::Authenticated;
            }
            Ok(None) => debug!("no stored tokens"),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable stored tokens");
                state.last_error = Some(e.to_string());
            }
        }

        Self {
            registration,
            store,
            scopes,
            http: http.unwrap_or_default(),
            registry,
            state: Mutex::new(state),
        }
    }

    /// Generate a fresh PKCE pair and the browser authorization URL.
    ///
    /// Replaces any pending verifier. `state` is the caller's anti-CSRF
    /// value, echoed back by the provider on the redirect.
    pub async fn begin_authorization(
        &self,
        redirect_uri: &str,
        state: Option<&str>,
    ) -> AuthorizationRequest {
        let pair = PkcePair::generate();
        let url = pkce::build_authorization_url(&AuthorizationParams {
            auth_endpoint: self.registration.auth_endpoint(),
            client_id: self.registration.client_id(),
            redirect_uri,
            scopes: &self.scopes,
            challenge: &pair.challenge,
            state,
        });
        let request = AuthorizationRequest {
            url,
            verifier: pair.verifier.clone(),
            redirect_uri: redirect_uri.to_string(),
            state: state.map(str::to_owned),
        };

        let mut guard = self.state.lock().await;
        guard.pending = Some(pair);
        guard.phase = AuthState::Authorizing;
        debug!(redirect_uri, "authorization started");
        request
    }

    /// Drop a pending authorization (user cancelled, CSRF mismatch, provider
    /// error) and return to the settled phase.
    pub async fn abandon_authorization(&self) {
        let mut guard = self.state.lock().await;
        guard.pending = None;
        if guard.phase == AuthState::Authorizing {
            guard.phase = guard.settled_phase();
        }
    }

    /// Trade an authorization code for tokens.
    ///
    /// Codes are single-use; never retry with the same code. The pending
    /// verifier is discarded whatever the outcome. A response without an
    /// `id_token` (no `openid` scope) is an `Exchange` error and its other
    /// tokens are dropped. When the provider accepts
    /// the code but the store cannot be written, the session is still
    /// authenticated in memory and the `Storage` error is returned.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenRecord> {
        let mut guard = self.state.lock().await;
        guard.pending = None;

        if code.trim().is_empty() {
            guard.phase = guard.settled_phase();
            return Err(Error::Validation("authorization code is empty".into()));
        }

        let result = token::exchange_code(&self.http, &self.registration, code, verifier, redirect_uri)
            .await
            .and_then(|response| {
                let had_refresh_token = response.refresh_token.is_some();
                TokenRecord::from_response(response, None, &self.scopes, Utc::now()).ok_or_else(|| {
                    // The code is spent by now; these tokens cannot be recovered.
                    warn!(
                        had_refresh_token,
                        scopes = %self.scopes.join(" "),
                        "token response had no id_token; access and refresh tokens discarded"
                    );
                    Error::exchange("token response did not include an id_token; is the openid scope requested?")
                })
            });
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                telemetry::record_exchange(Outcome::Failure);
                warn!(error = %e, "authorization code exchange failed");
                guard.phase = guard.settled_phase();
                guard.last_error = Some(e.to_string());
                return Err(e);
            }
        };
        telemetry::record_exchange(Outcome::Success);
        info!(user = ?record.user_email, "signed in");

        self.adopt(&mut guard, record).await
    }

    /// Exchange `code` using the verifier from the pending authorization.
    pub async fn complete_authorization(&self, code: &str, redirect_uri: &str) -> Result<TokenRecord> {
        let verifier = self
            .state
            .lock()
            .await
            .pending
            .as_ref()
            .map(|pair| pair.verifier.clone())
            .ok_or_else(|| Error::Validation("no authorization in progress".into()))?;
        self.exchange_code(code, &verifier, redirect_uri).await
    }

    /// Run the refresh grant against the held record.
    ///
    /// Fails with `Refresh` without touching the store or the network when
    /// no refresh token is held. On provider or transport failure the
    /// engine moves to `RefreshFailed` and keeps the old record.
    pub async fn refresh(&self) -> Result<TokenRecord> {
        let mut guard = self.state.lock().await;
        self.refresh_locked(&mut guard).await
    }

    async fn refresh_locked(&self, state: &mut EngineState) -> Result<TokenRecord> {
        let previous = match &state.record {
            Some(record) if record.has_refresh_token() => record.clone(),
            _ => {
                let e = Error::refresh("no refresh token available");
                state.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let result = token::refresh_grant(&self.http, &self.registration, previous.refresh_token.expose())
            .await
            .and_then(|response| {
                TokenRecord::from_response(response, Some(&previous), &self.scopes, Utc::now())
                    .ok_or_else(|| Error::refresh("token response did not include an id_token"))
            });
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                telemetry::record_refresh(Outcome::Failure);
                warn!(error = %e, "token refresh failed");
                state.phase = AuthState::RefreshFailed;
                state.last_error = Some(e.to_string());
                return Err(e);
            }
        };
        telemetry::record_refresh(Outcome::Success);
        debug!(expiry = %record.expiry, "refreshed tokens");

        self.adopt(state, record).await
    }

    /// Make `record` current: memory, then registry, then store.
    async fn adopt(&self, state: &mut EngineState, record: TokenRecord) -> Result<TokenRecord> {
        state.record = Some(record.clone());
        state.phase = AuthState::Authenticated;
        self.registry.publish(SharedCredentials {
            registration: self.registration.clone(),
            record: record.clone(),
        });

        if let Err(e) = self.store.save(&record).await {
            warn!(error = %e, "tokens obtained but could not be persisted");
            state.last_error = Some(e.to_string());
            return Err(e);
        }
        state.last_error = None;
        Ok(record)
    }

    /// The current record, refreshed first if it has expired.
    ///
    /// A failed refresh is not surfaced: the stale record is returned and
    /// the failure is visible through `state()` and `last_error()`. Callers
    /// that need a fresh token call `refresh()` and handle its error.
    pub async fn credentials(&self) -> Option<TokenRecord> {
        let mut guard = self.state.lock().await;
        let expired = guard.record.as_ref()?.is_expired();
        if expired {
            match self.refresh_locked(&mut guard).await {
                Ok(record) => return Some(record),
                // A refreshed record that failed to persist is still current.
                Err(Error::Storage { .. }) => {}
                Err(e) => debug!(error = %e, "returning stale tokens"),
            }
        }
        guard.record.clone()
    }

    /// Forget the session: memory, store, registry and any pending verifier.
    pub async fn clear(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        guard.record = None;
        guard.pending = None;
        guard.phase = AuthState::Unauthenticated;
        self.registry.clear();
        let cleared = self.store.clear().await;
        if let Err(e) = &cleared {
            guard.last_error = Some(e.to_string());
        }
        info!("signed out");
        cleared
    }

    pub async fn state(&self) -> AuthState {
        self.state.lock().await.phase
    }

    /// True while a record is held, expired or not.
    pub async fn is_authenticated(&self) -> bool {
        self.state.lock().await.record.is_some()
    }

    pub async fn user_email(&self) -> Option<String> {
        self.state.lock().await.record.as_ref()?.user_email.clone()
    }

    /// The held ID token, without any refresh.
    pub async fn id_token(&self) -> Option<String> {
        let guard = self.state.lock().await;
        guard.record.as_ref().map(|r| r.id_token.expose().clone())
    }

    /// The held record, without any refresh.
    pub async fn token_record(&self) -> Option<TokenRecord> {
        self.state.lock().await.record.clone()
    }

    /// Text of the most recent failure, cleared by the next success.
    pub async fn last_error(&self) -> Option<String> {
        self.state.lock().await.last_error.clone()
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn registration(&self) -> &ClientRegistration {
        &self.registration
    }

    pub fn registry(&self) -> &Arc<CredentialRegistry> {
        &self.registry
    }
}
