//! HTTP client for services behind Google Identity-Aware Proxy
//!
//! Attaches the signed-in user's ID token to every request. The token is
//! discovered from, in order: an explicit `CredentialEngine`, the
//! process-wide `CredentialRegistry`, then the token file. A 401 response
//! is retried once after a forced refresh.
//!
//! ```no_run
//! # async fn demo() -> iap_client::Result<()> {
//! let client = iap_client::IapClient::builder()
//!     .base_url("https://my-service.run.app")
//!     .build()?;
//! let data: serde_json::Value = client.get_json("/api/data").await?;
//! # let _ = data;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod source;
pub mod telemetry;

pub use client::{DEFAULT_TIMEOUT, IapClient, IapClientBuilder, RequestOptions};
pub use error::{Error, Result};
pub use source::{EngineSource, FileSource, RegistrySource, TokenChain, TokenSource};
