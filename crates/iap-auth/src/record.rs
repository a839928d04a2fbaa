//! The persisted token triple

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use common::Secret;
use serde::{Deserialize, Serialize};

use crate::claims;
use crate::constants::DEFAULT_EXPIRES_IN_SECS;
use crate::token::TokenResponse;

/// Access/ID/refresh tokens plus their absolute expiry.
///
/// Serialized as the token file: `expiry` is an RFC 3339 UTC timestamp and
/// `user_email` is `null` when unknown. Token fields print as `[REDACTED]`
/// under `Debug`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: Secret<String>,
    pub id_token: Secret<String>,
    /// Empty when the provider never issued one.
    #[serde(default = "empty_secret")]
    pub refresh_token: Secret<String>,
    pub expiry: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

fn empty_secret() -> Secret<String> {
    Secret::new(String::new())
}

impl TokenRecord {
    /// True once the current time reaches `expiry`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_blank()
    }

    /// Seconds until expiry, negative once expired.
    pub fn seconds_remaining(&self) -> i64 {
        (self.expiry - Utc::now()).num_seconds()
    }

    /// Build the record that supersedes `previous` from a token response.
    ///
    /// The refresh token, ID token and email are carried forward from
    /// `previous` when the response omits them. Scopes come from the granted
    /// `scope` field, else `previous`, else `requested`. Returns `None` when
    /// no ID token is available at all.
    pub(crate) fn from_response(
        response: TokenResponse,
        previous: Option<&TokenRecord>,
        requested: &[String],
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let TokenResponse {
            access_token,
            id_token,
            refresh_token,
            expires_in,
            scope,
        } = response;

        let id_token = id_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous.map(|p| p.id_token.expose().clone()))?;
        let refresh_token = refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous.map(|p| p.refresh_token.expose().clone()))
            .unwrap_or_default();
        let user_email = claims::email_from_id_token(&id_token)
            .or_else(|| previous.and_then(|p| p.user_email.clone()));
        let scopes = match scope {
            Some(granted) if !granted.trim().is_empty() => {
                granted.split_whitespace().map(str::to_owned).collect()
            }
            _ => previous
                .map(|p| p.scopes.clone())
                .unwrap_or_else(|| requested.to_vec()),
        };

        Some(Self {
            access_token: access_token.into(),
            id_token: id_token.into(),
            refresh_token: refresh_token.into(),
            expiry: expiry_after(now, expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)),
            scopes,
            user_email,
        })
    }
}

/// `now + secs`, truncated to whole seconds.
fn expiry_after(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    let lifetime = i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::seconds(DEFAULT_EXPIRES_IN_SECS as i64));
    now.trunc_subsecs(0)
        .checked_add_signed(lifetime)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record_expiring(expiry: DateTime<Utc>) -> TokenRecord {
        TokenRecord {
            access_token: "ya29.access".into(),
            id_token: "eyJ.id.token".into(),
            refresh_token: "1//refresh".into(),
            expiry,
            scopes: vec!["openid".into(), "email".into()],
            user_email: Some("user@example.com".into()),
        }
    }

    #[test]
    fn expiry_boundaries() {
        let expiry = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let record = record_expiring(expiry);

        assert!(!record.is_expired_at(expiry - Duration::seconds(1)));
        assert!(record.is_expired_at(expiry));
        assert!(record.is_expired_at(expiry + Duration::seconds(1)));
    }

    #[test]
    fn json_shape_matches_token_file() {
        let expiry = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let mut record = record_expiring(expiry);
        record.user_email = None;

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["access_token"], "ya29.access");
        assert_eq!(value["id_token"], "eyJ.id.token");
        assert_eq!(value["refresh_token"], "1//refresh");
        assert_eq!(value["expiry"], "2026-01-01T12:00:00Z");
        assert_eq!(value["scopes"], serde_json::json!(["openid", "email"]));
        assert!(value["user_email"].is_null());
    }

    #[test]
    fn refresh_token_defaults_to_empty() {
        let record: TokenRecord = serde_json::from_str(
            r#"{"access_token":"a","id_token":"i","expiry":"2026-01-01T00:00:00+00:00"}"#,
        )
        .unwrap();
        assert!(!record.has_refresh_token());
        assert!(record.scopes.is_empty());
        assert_eq!(record.user_email, None);
    }

    fn response(id_token: Option<&str>, refresh_token: Option<&str>) -> TokenResponse {
        TokenResponse {
            access_token: "at-new".into(),
            id_token: id_token.map(str::to_owned),
            refresh_token: refresh_token.map(str::to_owned),
            expires_in: Some(3600),
            scope: None,
        }
    }

    #[test]
    fn response_builds_absolute_whole_second_expiry() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::milliseconds(750);
        let id_token = crate::claims::fake_id_token(&serde_json::json!({"email": "a@example.com"}));
        let record = TokenRecord::from_response(
            response(Some(&id_token), Some("rt")),
            None,
            &["openid".to_string()],
            now,
        )
        .unwrap();

        assert_eq!(record.expiry, Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(record.user_email.as_deref(), Some("a@example.com"));
        assert_eq!(record.scopes, vec!["openid"]);
        assert_eq!(record.refresh_token.expose(), "rt");
    }

    #[test]
    fn response_carries_forward_omitted_fields() {
        let previous = record_expiring(Utc::now());
        let record =
            TokenRecord::from_response(response(None, None), Some(&previous), &[], Utc::now()).unwrap();

        assert_eq!(record.access_token.expose(), "at-new");
        assert_eq!(record.id_token, previous.id_token);
        assert_eq!(record.refresh_token, previous.refresh_token);
        assert_eq!(record.user_email, previous.user_email);
        assert_eq!(record.scopes, previous.scopes);
    }

    #[test]
    fn granted_scope_overrides_requested() {
        let mut resp = response(Some("h.e30.s"), None);
        resp.scope = Some("openid https://www.googleapis.com/auth/userinfo.email".into());
        let record = TokenRecord::from_response(resp, None, &["profile".to_string()], Utc::now()).unwrap();
        assert_eq!(
            record.scopes,
            vec!["openid", "https://www.googleapis.com/auth/userinfo.email"]
        );
        assert!(!record.has_refresh_token());
    }

    #[test]
    fn missing_id_token_without_previous_is_none() {
        assert!(TokenRecord::from_response(response(None, Some("rt")), None, &[], Utc::now()).is_none());
    }

    #[test]
    fn absurd_lifetime_does_not_overflow() {
        let expiry = expiry_after(Utc::now(), u64::MAX);
        assert!(expiry > Utc::now());
    }

    #[test]
    fn debug_redacts_tokens() {
        let record = record_expiring(Utc::now());
        let debug = format!("{record:?}");
        assert!(!debug.contains("ya29.access"));
        assert!(!debug.contains("1//refresh"));
        assert!(debug.contains("user@example.com"));
    }
}
