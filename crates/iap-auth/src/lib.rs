//! Google OAuth ID-token lifecycle for IAP-protected services
//!
//! Obtains, persists, and refreshes the ID token that Identity-Aware Proxy
//! accepts as a bearer credential. The crate has no UI; the `iap-login`
//! binary and the `iap-client` HTTP wrapper build on it.
//!
//! Credential flow:
//! 1. `Installer` writes `client_secrets.json`; `ClientRegistration::load_default` reads it
//! 2. `CredentialEngine::initialize` adopts any tokens already in the `TokenStore`
//! 3. `CredentialEngine::begin_authorization` yields a PKCE-bound browser URL
//! 4. `CredentialEngine::exchange_code` trades the redirect's code for a `TokenRecord`
//! 5. The record is saved and published to the `CredentialRegistry`
//! 6. `CredentialEngine::refresh` / `credentials` keep the ID token fresh

pub mod claims;
pub mod constants;
pub mod engine;
pub mod error;
pub mod install;
pub mod pkce;
pub mod record;
pub mod registration;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod token;

pub use claims::UnverifiedClaims;
pub use constants::*;
pub use engine::{AuthState, AuthorizationRequest, CredentialEngine, EngineOptions};
pub use error::{Error, Result, StorageErrorKind};
pub use install::{InstallRequest, Installer};
pub use pkce::PkcePair;
pub use record::TokenRecord;
pub use registration::ClientRegistration;
pub use registry::{CredentialRegistry, SharedCredentials};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::{TokenResponse, exchange_code, refresh_grant};
