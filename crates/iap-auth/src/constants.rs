//! Google OAuth constants
//!
//! Endpoint defaults used when a client descriptor omits `auth_uri` /
//! `token_uri`. These identify Google's public OAuth endpoints and are not
//! secrets; the client secret and tokens are handled elsewhere.

use std::time::Duration;

/// Google's OAuth 2.0 authorization endpoint (browser-facing)
pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

/// Token endpoint for code exchange and token refresh
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Certificate URL written into installed descriptors for completeness
pub const GOOGLE_CERT_URL: &str = "https://www.googleapis.com/oauth2/v1/certs";

/// Redirect URI used when no loopback listener is available
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost";

/// Scopes requested by default. `openid` is what makes Google issue an ID
/// token, which is the credential IAP accepts.
pub const DEFAULT_SCOPES: &[&str] = &["openid", "email", "profile"];

/// Upper bound on a single token endpoint round-trip
pub const TOKEN_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Owner read/write only
pub const SECURE_FILE_MODE: u32 = 0o600;

/// Default scopes as owned strings.
pub fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}
