use serde::{Deserialize, Serialize};
use url::Url;

/// Path of the OpenID Provider configuration document, relative to the issuer.
pub const OPENID_CONFIGURATION_PATH: &str = ".well-known/openid-configuration";

/// The subset of the OpenID Provider metadata this crate relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

impl ProviderMetadata {
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            jwks_uri: None,
            end_session_endpoint: None,
        }
    }

    #[must_use]
    pub fn with_end_session_endpoint(mut self, uri: impl Into<String>) -> Self {
        self.end_session_endpoint = Some(uri.into());
        self
    }
}

/// Discovery document URL for `issuer`, tolerating a missing trailing slash.
///
/// # Errors
///
/// Returns a parse error if the joined URL is invalid.
pub fn discovery_url(issuer: &Url) -> Result<Url, url::ParseError> {
    let mut base = issuer.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(OPENID_CONFIGURATION_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_url_handles_trailing_slash() {
        let with = Url::parse("https://op.example.com/").unwrap();
        let without = Url::parse("https://op.example.com/tenant").unwrap();
        assert_eq!(
            discovery_url(&with).unwrap().as_str(),
            "https://op.example.com/.well-known/openid-configuration"
        );
        assert_eq!(
            discovery_url(&without).unwrap().as_str(),
            "https://op.example.com/tenant/.well-known/openid-configuration"
        );
    }

    #[test]
    fn parses_minimal_document() {
        let doc: ProviderMetadata = serde_json::from_value(serde_json::json!({
            "issuer": "https://op.example.com/",
            "authorization_endpoint": "https://op.example.com/authorize",
            "token_endpoint": "https://op.example.com/oauth/token",
            "end_session_endpoint": "https://op.example.com/session/end"
        }))
        .unwrap();
        assert_eq!(
            doc.end_session_endpoint.as_deref(),
            Some("https://op.example.com/session/end")
        );
        assert!(doc.jwks_uri.is_none());
    }
}
