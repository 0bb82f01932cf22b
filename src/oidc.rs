//! The identity-provider adapter seam.
//!
//! The flow controller and the access token manager talk to the provider only
//! through [`OidcClient`]. The crate ships a reqwest implementation
//! (`HttpOidcClient`, feature `http-client`); tests and unusual providers can
//! supply their own.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::types::Claims;
use crate::well_known::ProviderMetadata;

/// Token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl TokenSet {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_in: None,
            refresh_token: None,
            id_token: None,
            scope: None,
        }
    }

    #[must_use]
    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_id_token(mut self, token: impl Into<String>) -> Self {
        self.id_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

/// Authorization-code grant input.
#[derive(Debug, Clone, Copy)]
pub struct CodeExchange<'a> {
    pub code: &'a str,
    pub code_verifier: Option<&'a str>,
    pub redirect_uri: &'a str,
}

/// Operations required from an OpenID Connect provider.
///
/// Network-bound methods are async and must honour the configured HTTP
/// timeout. Grants are never retried: token endpoints are not guaranteed to
/// be idempotent.
pub trait OidcClient: Send + Sync + 'static {
    /// Provider metadata, fetched once and cached for the process lifetime.
    fn discover(&self) -> impl Future<Output = Result<Arc<ProviderMetadata>, Error>> + Send;

    /// Exchange an authorization code (and PKCE verifier) for tokens.
    fn exchange_code(
        &self,
        exchange: CodeExchange<'_>,
    ) -> impl Future<Output = Result<TokenSet, Error>> + Send;

    /// Run the refresh-token grant.
    fn refresh(&self, refresh_token: &str)
    -> impl Future<Output = Result<TokenSet, Error>> + Send;

    /// Verify signature, issuer, audience and expiry of `id_token`, and that
    /// its `nonce` claim equals `nonce` when one is expected.
    fn validate_id_token(
        &self,
        id_token: &str,
        nonce: Option<&str>,
    ) -> impl Future<Output = Result<Claims, Error>> + Send;

    /// Authorization endpoint URL carrying `params`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if the endpoint is not a valid URL.
    fn authorization_url(
        &self,
        metadata: &ProviderMetadata,
        params: &[(String, String)],
    ) -> Result<Url, Error> {
        endpoint_with_params(&metadata.authorization_endpoint, params)
    }

    /// End-session endpoint URL carrying `params`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if the provider advertises no end-session
    /// endpoint or it is not a valid URL.
    fn end_session_url(
        &self,
        metadata: &ProviderMetadata,
        params: &[(String, String)],
    ) -> Result<Url, Error> {
        let endpoint = metadata
            .end_session_endpoint
            .as_deref()
            .ok_or_else(|| Error::Discovery("provider has no end_session_endpoint".into()))?;
        endpoint_with_params(endpoint, params)
    }
}

/// Append `params` to `endpoint`, keeping any query it already carries.
pub(crate) fn endpoint_with_params(
    endpoint: &str,
    params: &[(String, String)],
) -> Result<Url, Error> {
    let mut url =
        Url::parse(endpoint).map_err(|e| Error::Discovery(format!("{endpoint}: {e}")))?;
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}
