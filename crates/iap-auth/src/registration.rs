//! OAuth client identity
//!
//! Loaded from the JSON descriptor Google Cloud Console hands out
//! (`client_secrets.json`). Both the "installed" (desktop) and "web" shapes
//! are accepted; endpoints default to Google's when omitted.

use std::path::Path;

use common::Secret;
use serde::Deserialize;
use tracing::debug;

use crate::constants::{GOOGLE_AUTH_URI, GOOGLE_TOKEN_URI};
use crate::error::{Error, Result};

/// Immutable OAuth client identity.
#[derive(Debug, Clone)]
pub struct ClientRegistration {
    client_id: String,
    client_secret: Secret<String>,
    auth_endpoint: String,
    token_endpoint: String,
    redirect_uris: Vec<String>,
}

/// One section ("installed" or "web") of a descriptor file.
#[derive(Deserialize)]
struct DescriptorSection {
    client_id: Option<String>,
    client_secret: Option<Secret<String>>,
    auth_uri: Option<String>,
    token_uri: Option<String>,
    #[serde(default)]
    redirect_uris: Option<Vec<String>>,
}

impl ClientRegistration {
    /// Build a registration for Google's endpoints from an id/secret pair.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<Secret<String>>) -> Result<Self> {
        Self::with_endpoints(client_id, client_secret, GOOGLE_AUTH_URI, GOOGLE_TOKEN_URI)
    }

    /// Build a registration with explicit endpoints.
    pub fn with_endpoints(
        client_id: impl Into<String>,
        client_secret: impl Into<Secret<String>>,
        auth_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Result<Self> {
        let client_id = client_id.into().trim().to_string();
        let client_secret = client_secret.into();
        if client_id.is_empty() {
            return Err(Error::Validation("client_id cannot be empty".into()));
        }
        if client_secret.is_blank() {
            return Err(Error::Validation("client_secret cannot be empty".into()));
        }
        let auth_endpoint = auth_endpoint.into();
        let token_endpoint = token_endpoint.into();
        check_endpoint("auth endpoint", &auth_endpoint).map_err(Error::Validation)?;
        check_endpoint("token endpoint", &token_endpoint).map_err(Error::Validation)?;

        Ok(Self {
            client_id,
            client_secret,
            auth_endpoint,
            token_endpoint,
            redirect_uris: Vec::new(),
        })
    }

    /// Attach the redirect URIs registered for this client.
    pub fn with_redirect_uris(mut self, redirect_uris: Vec<String>) -> Self {
        self.redirect_uris = redirect_uris;
        self
    }

    /// Load a descriptor file.
    ///
    /// Fails with `NotFound` if the path does not exist and `Format` if the
    /// document has neither an "installed" nor a "web" section or lacks
    /// `client_id` / `client_secret`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "client secrets file not found: {}",
                path.display()
            )));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Format(format!("reading {}: {e}", path.display()))
        })?;
        let registration = Self::from_json(&contents)?;
        debug!(path = %path.display(), client_id = %registration.client_id, "loaded client registration");
        Ok(registration)
    }

    /// Load the descriptor installed at the standard per-user location.
    pub fn load_default() -> Result<Self> {
        let path = common::paths::client_secrets_path()
            .map_err(|e| Error::NotFound(e.to_string()))?;
        Self::load(&path)
    }

    /// Parse a descriptor document.
    pub fn from_json(contents: &str) -> Result<Self> {
        let document: serde_json::Value = serde_json::from_str(contents)
            .map_err(|e| Error::Format(format!("invalid JSON: {e}")))?;
        let section = descriptor_section(&document)?;
        let section: DescriptorSection = serde_json::from_value(section.clone())
            .map_err(|e| Error::Format(format!("malformed descriptor section: {e}")))?;

        let client_id = section
            .client_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::Format("missing client_id".into()))?;
        let client_secret = section
            .client_secret
            .filter(|s| !s.is_blank())
            .ok_or_else(|| Error::Format("missing client_secret".into()))?;
        let auth_endpoint = section.auth_uri.unwrap_or_else(|| GOOGLE_AUTH_URI.to_string());
        let token_endpoint = section.token_uri.unwrap_or_else(|| GOOGLE_TOKEN_URI.to_string());
        check_endpoint("auth_uri", &auth_endpoint).map_err(Error::Format)?;
        check_endpoint("token_uri", &token_endpoint).map_err(Error::Format)?;

        Ok(Self {
            client_id: client_id.trim().to_string(),
            client_secret,
            auth_endpoint,
            token_endpoint,
            redirect_uris: section.redirect_uris.unwrap_or_default(),
        })
    }

    /// Serialize back to an "installed" descriptor document.
    pub fn to_json(&self) -> serde_json::Value {
        let mut section = serde_json::json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret.expose(),
            "auth_uri": self.auth_endpoint,
            "token_uri": self.token_endpoint,
        });
        if !self.redirect_uris.is_empty() {
            section["redirect_uris"] = serde_json::json!(self.redirect_uris);
        }
        serde_json::json!({ "installed": section })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &Secret<String> {
        &self.client_secret
    }

    pub fn auth_endpoint(&self) -> &str {
        &self.auth_endpoint
    }

    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    pub fn redirect_uris(&self) -> &[String] {
        &self.redirect_uris
    }
}

/// Pick the "installed" section, else "web". Shared with the installer,
/// which validates a source file before copying it.
pub(crate) fn descriptor_section(document: &serde_json::Value) -> Result<&serde_json::Value> {
    let section = document
        .get("installed")
        .or_else(|| document.get("web"))
        .ok_or_else(|| Error::Format("expected an 'installed' or 'web' key".into()))?;
    if !section.is_object() {
        return Err(Error::Format("descriptor section must be a JSON object".into()));
    }
    Ok(section)
}

fn check_endpoint(label: &str, value: &str) -> std::result::Result<(), String> {
    let parsed = url::Url::parse(value).map_err(|e| format!("{label} is not a valid URL ({value}): {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("{label} must use http or https, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_installed_descriptor_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "client_secrets.json",
            r#"{"installed":{"client_id":"123.apps.googleusercontent.com","client_secret":"GOCSPX-x"}}"#,
        );

        let reg = ClientRegistration::load(&path).unwrap();
        assert_eq!(reg.client_id(), "123.apps.googleusercontent.com");
        assert_eq!(reg.client_secret().expose(), "GOCSPX-x");
        assert_eq!(reg.auth_endpoint(), GOOGLE_AUTH_URI);
        assert_eq!(reg.token_endpoint(), GOOGLE_TOKEN_URI);
        assert!(reg.redirect_uris().is_empty());
    }

    #[test]
    fn loads_web_descriptor_with_custom_endpoints() {
        let reg = ClientRegistration::from_json(
            r#"{"web":{
                "client_id":"web-id",
                "client_secret":"web-secret",
                "auth_uri":"https://idp.example.com/auth",
                "token_uri":"https://idp.example.com/token",
                "redirect_uris":["http://localhost:8080/cb"]
            }}"#,
        )
        .unwrap();
        assert_eq!(reg.client_id(), "web-id");
        assert_eq!(reg.auth_endpoint(), "https://idp.example.com/auth");
        assert_eq!(reg.token_endpoint(), "https://idp.example.com/token");
        assert_eq!(reg.redirect_uris(), ["http://localhost:8080/cb"]);
    }

    #[test]
    fn installed_takes_precedence_over_web() {
        let reg = ClientRegistration::from_json(
            r#"{"web":{"client_id":"w","client_secret":"ws"},
                "installed":{"client_id":"i","client_secret":"is"}}"#,
        )
        .unwrap();
        assert_eq!(reg.client_id(), "i");
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = ClientRegistration::load(Path::new("/nonexistent/client_secrets.json"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
    }

    #[test]
    fn unknown_shape_is_format_error() {
        let err = ClientRegistration::from_json(r#"{"other":{"client_id":"x"}}"#).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "got {err:?}");
        assert!(err.to_string().contains("'installed' or 'web'"));
    }

    #[test]
    fn missing_required_fields_are_format_errors() {
        let err = ClientRegistration::from_json(r#"{"installed":{"client_secret":"s"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("client_id"), "got {err}");

        let err = ClientRegistration::from_json(r#"{"installed":{"client_id":"i","client_secret":""}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("client_secret"), "got {err}");
    }

    #[test]
    fn invalid_json_is_format_error() {
        let err = ClientRegistration::from_json("not json {{").unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn non_http_endpoint_is_rejected() {
        let err = ClientRegistration::from_json(
            r#"{"installed":{"client_id":"i","client_secret":"s","token_uri":"ftp://x/token"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("token_uri"), "got {err}");
    }

    #[test]
    fn serialized_form_round_trips_identity() {
        let cases = [
            ("123.apps.googleusercontent.com", "GOCSPX-abc"),
            ("id with spaces inside", "secret/with+symbols=="),
            ("ü-unicode", "🔑"),
        ];
        for (id, secret) in cases {
            let reg = ClientRegistration::new(id, secret).unwrap();
            let back = ClientRegistration::from_json(&reg.to_json().to_string()).unwrap();
            assert_eq!(back.client_id(), id);
            assert_eq!(back.client_secret().expose(), secret);
        }
    }

    #[test]
    fn direct_construction_validates_inputs() {
        assert!(matches!(
            ClientRegistration::new("", "s"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            ClientRegistration::new("id", "  "),
            Err(Error::Validation(_))
        ));
        assert!(ClientRegistration::new(" id ", "s").is_ok());
    }

    #[test]
    fn debug_output_redacts_secret() {
        let reg = ClientRegistration::new("id", "very-secret").unwrap();
        let debug = format!("{reg:?}");
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
