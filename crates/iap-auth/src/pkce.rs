//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! The authorization step runs in a browser popup that cannot protect a
//! client secret, so the code is bound to a verifier held only in this
//! process. The challenge travels in the authorization URL; the verifier is
//! sent with the code at exchange time and then discarded.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Random bytes behind each verifier. 64 bytes encode to 86 characters,
/// inside RFC 7636's 43..=128 range.
const VERIFIER_BYTES: usize = 64;

pub const CHALLENGE_METHOD: &str = "S256";

/// A verifier and its S256 challenge, generated fresh per authorization
/// attempt. Never persisted.
#[derive(Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    pub fn method(&self) -> &'static str {
        CHALLENGE_METHOD
    }
}

impl fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Generate a cryptographically random, URL-safe code verifier.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Parameters of one browser authorization request.
#[derive(Debug)]
pub struct AuthorizationParams<'a> {
    pub auth_endpoint: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scopes: &'a [String],
    pub challenge: &'a str,
    pub state: Option<&'a str>,
}

/// Build the provider authorization URL.
///
/// `access_type=offline` plus `prompt=consent` makes Google issue a refresh
/// token on every run, not only on first consent. The query is
/// `application/x-www-form-urlencoded`, so scope separators become `+`;
/// `state` is appended only when given.
pub fn build_authorization_url(params: &AuthorizationParams<'_>) -> String {
    let scope = params.scopes.join(" ");
    let mut pairs: Vec<(&str, &str)> = vec![
        ("client_id", params.client_id),
        ("redirect_uri", params.redirect_uri),
        ("response_type", "code"),
        ("scope", &scope),
        ("access_type", "offline"),
        ("prompt", "consent"),
        ("code_challenge", params.challenge),
        ("code_challenge_method", CHALLENGE_METHOD),
    ];
    if let Some(state) = params.state.filter(|s| !s.is_empty()) {
        pairs.push(("state", state));
    }

    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();

    let separator = if params.auth_endpoint.contains('?') {
        '&'
    } else {
        '?'
    };
    format!("{}{separator}{query}", params.auth_endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes() -> Vec<String> {
        vec!["openid".into(), "email".into(), "profile".into()]
    }

    fn params<'a>(scopes: &'a [String], state: Option<&'a str>) -> AuthorizationParams<'a> {
        AuthorizationParams {
            auth_endpoint: "https://accounts.google.com/o/oauth2/auth",
            client_id: "123.apps.googleusercontent.com",
            redirect_uri: "http://127.0.0.1:8085",
            scopes,
            challenge: "abc-_123",
            state,
        }
    }

    #[test]
    fn verifier_is_url_safe_base64() {
        let verifier = generate_verifier();
        // 64 bytes → 86 base64url chars (no padding)
        assert_eq!(verifier.len(), 86);
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier must be URL-safe base64 (no padding): {verifier}"
        );
    }

    #[test]
    fn verifiers_are_unique() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier, "two verifiers must not collide");
    }

    #[test]
    fn generated_pair_challenge_matches_verifier() {
        for _ in 0..16 {
            let pair = PkcePair::generate();
            assert_eq!(pair.challenge, compute_challenge(&pair.verifier));
            assert_eq!(pair.method(), "S256");
        }
    }

    #[test]
    fn challenge_matches_known_value() {
        // SHA256("hello") base64url-encoded without padding
        assert_eq!(
            compute_challenge("hello"),
            "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ"
        );
    }

    #[test]
    fn challenge_decodes_to_sha256_length() {
        let challenge = compute_challenge(&generate_verifier());
        let decoded = URL_SAFE_NO_PAD.decode(&challenge).expect("valid base64url");
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn debug_hides_verifier() {
        let pair = PkcePair::generate();
        let debug = format!("{pair:?}");
        assert!(!debug.contains(&pair.verifier));
        assert!(debug.contains(&pair.challenge));
    }

    #[test]
    fn authorization_url_contains_required_params() {
        let scopes = scopes();
        let url = build_authorization_url(&params(&scopes, Some("csrf-token")));

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?"));
        assert!(url.contains("client_id=123.apps.googleusercontent.com"));
        assert!(url.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A8085"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=openid+email+profile"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("code_challenge=abc-_123"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.ends_with("&state=csrf-token"));
    }

    #[test]
    fn authorization_url_omits_absent_state() {
        let scopes = scopes();
        let url = build_authorization_url(&params(&scopes, None));
        assert!(!url.contains("state="));

        let url = build_authorization_url(&params(&scopes, Some("")));
        assert!(!url.contains("state="));
    }

    #[test]
    fn authorization_url_encodes_reserved_characters() {
        let scopes = vec!["https://www.googleapis.com/auth/userinfo.email".to_string()];
        let url = build_authorization_url(&params(&scopes, Some("a b&c=d")));
        assert!(url.contains("scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fuserinfo.email"));
        assert!(url.contains("state=a+b%26c%3Dd"));

        let parsed = url::Url::parse(&url).unwrap();
        let state = parsed
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned());
        assert_eq!(state.as_deref(), Some("a b&c=d"));
    }

    #[test]
    fn authorization_url_appends_to_existing_query() {
        let scopes = scopes();
        let mut p = params(&scopes, None);
        p.auth_endpoint = "https://idp.example.com/auth?tenant=x";
        let url = build_authorization_url(&p);
        assert!(url.starts_with("https://idp.example.com/auth?tenant=x&client_id="));
    }
}
