//! Display-only JWT payload decoding
//!
//! Reads claims out of an ID token WITHOUT verifying its signature. The
//! result is only fit for showing the signed-in user's email in a status
//! line. The IAP proxy in front of the protected service is what verifies
//! the token; nothing here may be used for an authorization decision.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};

/// Claims read from an unverified token payload.
#[derive(Debug, Clone, PartialEq)]
pub struct UnverifiedClaims {
    claims: Map<String, Value>,
}

impl UnverifiedClaims {
    /// Decode the payload segment of a compact JWT.
    ///
    /// Returns `None` for anything that is not three dot-separated segments
    /// with a base64url JSON object in the middle.
    pub fn decode(token: &str) -> Option<Self> {
        let mut segments = token.split('.');
        let (_header, payload, _sig) = (segments.next()?, segments.next()?, segments.next()?);
        if segments.next().is_some() {
            return None;
        }
        // Tolerate padded encoders.
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        match serde_json::from_slice(&bytes).ok()? {
            Value::Object(claims) => Some(Self { claims }),
            _ => None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.claims.get("email").and_then(Value::as_str)
    }

    pub fn subject(&self) -> Option<&str> {
        self.claims.get("sub").and_then(Value::as_str)
    }

    /// `exp` as seconds since the epoch.
    pub fn expires_at(&self) -> Option<i64> {
        self.claims.get("exp").and_then(Value::as_i64)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.claims
    }
}

/// Email claim of an ID token, if it can be read.
pub fn email_from_id_token(id_token: &str) -> Option<String> {
    UnverifiedClaims::decode(id_token)?.email().map(str::to_owned)
}

/// Build an unsigned token with the given payload. Test helper shared by
/// the engine and store tests.
#[cfg(test)]
pub(crate) fn fake_id_token(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.signature")
}
