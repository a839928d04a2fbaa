//! Process-wide credential handle
//!
//! A single slot that the most recent successful exchange or refresh
//! publishes into, so an HTTP client constructed without an engine can
//! still find the signed-in user's token.
//!
//! Single-writer contract: the slot is last-writer-wins. Two engines
//! running in one process overwrite each other's entry; that is supported
//! only in the sense that reads stay consistent, never merged. Components
//! that need isolation take an explicit `Arc<CredentialRegistry>` instead
//! of `CredentialRegistry::global()`.

use std::sync::{Arc, OnceLock, RwLock};

use chrono::Utc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::record::TokenRecord;
use crate::registration::ClientRegistration;
use crate::telemetry::{self, Outcome};
use crate::token;

/// A token record plus the identity able to refresh it.
#[derive(Debug, Clone)]
pub struct SharedCredentials {
    pub registration: ClientRegistration,
    pub record: TokenRecord,
}

impl SharedCredentials {
    pub fn is_expired(&self) -> bool {
        self.record.is_expired()
    }

    pub fn id_token(&self) -> &str {
        self.record.id_token.expose()
    }

    /// Run the refresh grant and return the superseding credentials.
    ///
    /// Nothing is persisted; only the engine writes the token store.
    pub async fn refreshed(&self, http: &reqwest::Client) -> Result<SharedCredentials> {
        if !self.record.has_refresh_token() {
            return Err(Error::refresh("no refresh token available"));
        }
        let response =
            match token::refresh_grant(http, &self.registration, self.record.refresh_token.expose()).await {
                Ok(response) => response,
                Err(e) => {
                    telemetry::record_refresh(Outcome::Failure);
                    return Err(e);
                }
            };
        let record = TokenRecord::from_response(response, Some(&self.record), &[], Utc::now())
            .ok_or_else(|| Error::refresh("token response did not include an id_token"))?;
        telemetry::record_refresh(Outcome::Success);
        Ok(SharedCredentials {
            registration: self.registration.clone(),
            record,
        })
    }
}

/// Nullable slot holding the latest published credentials.
#[derive(Debug, Default)]
pub struct CredentialRegistry {
    slot: RwLock<Option<SharedCredentials>>,
}

impl CredentialRegistry {
    /// A fresh, empty registry (tests, embedders wanting isolation).
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The registry shared by every engine and client in the process.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<CredentialRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(CredentialRegistry::new).clone()
    }

    /// Replace whatever is in the slot.
    pub fn publish(&self, credentials: SharedCredentials) {
        debug!(user = ?credentials.record.user_email, "published credentials");
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = Some(credentials);
    }

    pub fn current(&self) -> Option<SharedCredentials> {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_empty(&self) -> bool {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sample_record;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn shared(token_endpoint: &str, record: TokenRecord) -> SharedCredentials {
        SharedCredentials {
            registration: ClientRegistration::with_endpoints(
                "cid",
                "secret",
                "https://accounts.example.com/auth",
                token_endpoint,
            )
            .unwrap(),
            record,
        }
    }

    #[test]
    fn slot_is_last_writer_wins() {
        let registry = CredentialRegistry::new();
        assert!(registry.is_empty());

        let mut first = sample_record();
        first.user_email = Some("first@example.com".into());
        let mut second = sample_record();
        second.user_email = Some("second@example.com".into());

        registry.publish(shared("https://oauth2.example.com/token", first));
        registry.publish(shared("https://oauth2.example.com/token", second));
        assert_eq!(
            registry.current().unwrap().record.user_email.as_deref(),
            Some("second@example.com")
        );

        registry.clear();
        assert!(registry.current().is_none());
    }

    #[test]
    fn global_is_one_instance() {
        assert!(Arc::ptr_eq(&CredentialRegistry::global(), &CredentialRegistry::global()));
    }

    #[tokio::test]
    async fn refreshed_carries_identity_forward() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-2",
                "id_token": "h.e30.new",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let creds = shared(&format!("{}/token", server.uri()), sample_record());
        let fresh = creds.refreshed(&reqwest::Client::new()).await.unwrap();
        assert_eq!(fresh.id_token(), "h.e30.new");
        assert_eq!(fresh.record.refresh_token, creds.record.refresh_token);
        assert_eq!(fresh.record.user_email, creds.record.user_email);
        assert!(!fresh.is_expired());
    }

    #[tokio::test]
    async fn refreshed_without_refresh_token_fails_offline() {
        let mut record = sample_record();
        record.refresh_token = "".into();
        let creds = shared("http://127.0.0.1:9/token", record);
        let err = creds.refreshed(&reqwest::Client::new()).await.unwrap_err();
        assert!(matches!(err, Error::Refresh { .. }));
    }
}
