use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{OnceCell, RwLock};
use url::Url;

use crate::config::Config;
use crate::error::Error;
use crate::oidc::{CodeExchange, OidcClient, TokenSet};
use crate::types::Claims;
use crate::well_known::{ProviderMetadata, discovery_url};

/// Header identifying this library to the provider.
pub const TELEMETRY_HEADER: &str = "authok-client";

/// reqwest-backed [`OidcClient`].
///
/// Discovery is fetched once per client and cached for its lifetime. The JWKS
/// is cached too, and fetched again once when a token names an unknown key.
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// let client = HttpOidcClient::new(&config)?;
/// ```
pub struct HttpOidcClient {
    http: reqwest::Client,
    issuer: Url,
    client_id: String,
    client_secret: Option<SecretString>,
    algorithm: Algorithm,
    leeway: u64,
    metadata: OnceCell<Arc<ProviderMetadata>>,
    jwks: RwLock<Option<Arc<JwkSet>>>,
}

impl std::fmt::Debug for HttpOidcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOidcClient")
            .field("issuer", &self.issuer.as_str())
            .field("client_id", &self.client_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ProviderError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl HttpOidcClient {
    /// Build a client from resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unsupported signing algorithm, or
    /// [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let algorithm = Algorithm::from_str(config.id_token_signing_alg()).map_err(|_| {
            Error::Config(format!(
                "unsupported ID token signing algorithm {}",
                config.id_token_signing_alg()
            ))
        })?;

        let mut headers = HeaderMap::new();
        if config.enable_telemetry() {
            headers.insert(
                HeaderName::from_static(TELEMETRY_HEADER),
                HeaderValue::from_str(&telemetry_value())
                    .map_err(|e| Error::Config(format!("telemetry header: {e}")))?,
            );
        }
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            issuer: config.issuer_base_url().clone(),
            client_id: config.client_id().to_string(),
            client_secret: config.client_secret().cloned(),
            algorithm,
            leeway: config.clock_tolerance().as_secs(),
            metadata: OnceCell::new(),
            jwks: RwLock::new(None),
        })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    ///
    /// The configured timeout and telemetry header are not applied to it.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    async fn fetch_metadata(&self) -> Result<Arc<ProviderMetadata>, Error> {
        let url = discovery_url(&self.issuer)
            .map_err(|e| Error::Discovery(format!("{}: {e}", self.issuer)))?;
        tracing::debug!(%url, "fetching provider metadata");
        let response = self.http.get(url).send().await?;
        let response = ensure_success(response, Error::Discovery).await?;
        let metadata = response
            .json::<ProviderMetadata>()
            .await
            .map_err(|e| Error::Discovery(e.to_string()))?;
        Ok(Arc::new(metadata))
    }

    async fn fetch_jwks(&self) -> Result<Arc<JwkSet>, Error> {
        let metadata = self.discover().await?;
        let uri = metadata
            .jwks_uri
            .as_deref()
            .ok_or_else(|| Error::Discovery("provider has no jwks_uri".into()))?;
        let response = self.http.get(uri).send().await?;
        let response = ensure_success(response, Error::Discovery).await?;
        let jwks = response
            .json::<JwkSet>()
            .await
            .map_err(|e| Error::Discovery(format!("jwks: {e}")))?;
        let jwks = Arc::new(jwks);
        *self.jwks.write().await = Some(Arc::clone(&jwks));
        Ok(jwks)
    }

    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, Error> {
        if is_symmetric(self.algorithm) {
            let secret = self.client_secret.as_ref().ok_or_else(|| {
                Error::Config("clientSecret is required for symmetric ID tokens".into())
            })?;
            return Ok(DecodingKey::from_secret(secret.expose_secret().as_bytes()));
        }

        let cached = self.jwks.read().await.clone();
        let jwks = match cached {
            Some(jwks) if find_key(&jwks, kid).is_some() => jwks,
            // unknown kid: the provider may have rotated keys
            _ => self.fetch_jwks().await?,
        };
        let jwk = find_key(&jwks, kid).ok_or_else(|| {
            Error::IdTokenValidation(format!("no signing key matches kid {kid:?}"))
        })?;
        DecodingKey::from_jwk(jwk).map_err(|e| Error::IdTokenValidation(e.to_string()))
    }

    /// POST to the token endpoint, authenticating with `client_secret_post`
    /// when a client secret is configured.
    fn token_request(
        &self,
        endpoint: &str,
        mut form: Vec<(&'static str, String)>,
    ) -> reqwest::RequestBuilder {
        form.push(("client_id", self.client_id.clone()));
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose_secret().to_string()));
        }
        self.http.post(endpoint).form(&form)
    }
}

impl OidcClient for HttpOidcClient {
    async fn discover(&self) -> Result<Arc<ProviderMetadata>, Error> {
        self.metadata
            .get_or_try_init(|| self.fetch_metadata())
            .await
            .cloned()
    }

    async fn exchange_code(&self, exchange: CodeExchange<'_>) -> Result<TokenSet, Error> {
        let metadata = self.discover().await?;
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", exchange.code.to_string()),
            ("redirect_uri", exchange.redirect_uri.to_string()),
        ];
        if let Some(verifier) = exchange.code_verifier {
            form.push(("code_verifier", verifier.to_string()));
        }

        let response = self
            .token_request(&metadata.token_endpoint, form)
            .send()
            .await?;
        let response = ensure_success(response, Error::TokenExchange).await?;
        response
            .json::<TokenSet>()
            .await
            .map_err(|e| Error::TokenExchange(e.to_string()))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, Error> {
        let metadata = self.discover().await?;
        let form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        let response = self
            .token_request(&metadata.token_endpoint, form)
            .send()
            .await?;
        let response = ensure_success(response, Error::TokenRefresh).await?;
        response
            .json::<TokenSet>()
            .await
            .map_err(|e| Error::TokenRefresh(e.to_string()))
    }

    async fn validate_id_token(
        &self,
        id_token: &str,
        nonce: Option<&str>,
    ) -> Result<Claims, Error> {
        let metadata = self.discover().await?;
        let header = jsonwebtoken::decode_header(id_token)
            .map_err(|e| Error::IdTokenValidation(e.to_string()))?;
        if header.alg != self.algorithm {
            return Err(Error::IdTokenValidation(format!(
                "unexpected algorithm {:?}, expected {:?}",
                header.alg, self.algorithm
            )));
        }
        let key = self.decoding_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(self.algorithm);
        validation.leeway = self.leeway;
        validation.set_issuer(&[metadata.issuer.as_str()]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "aud", "sub"]);

        let claims = jsonwebtoken::decode::<Claims>(id_token, &key, &validation)
            .map_err(|e| Error::IdTokenValidation(e.to_string()))?
            .claims;

        if let Some(expected) = nonce {
            let actual = claims.get("nonce").and_then(|v| v.as_str());
            if actual != Some(expected) {
                return Err(Error::IdTokenValidation("nonce mismatch".into()));
            }
        }
        Ok(claims)
    }
}

fn is_symmetric(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

/// The key named `kid`, or the only key when the token names none.
fn find_key<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Option<&'a jsonwebtoken::jwk::Jwk> {
    match kid {
        Some(kid) => jwks.find(kid),
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
}

fn telemetry_value() -> String {
    let payload = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    });
    STANDARD.encode(payload.to_string())
}

/// Checks HTTP response status; returns the response on success or `on_error`
/// with the provider's error details.
async fn ensure_success(
    response: reqwest::Response,
    on_error: impl FnOnce(String) -> Error,
) -> Result<reqwest::Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ProviderError>(&body) {
        Ok(ProviderError {
            error,
            error_description: Some(description),
        }) => format!("{status} {error}: {description}"),
        Ok(ProviderError { error, .. }) => format!("{status} {error}"),
        Err(_) => format!("{status} {body}"),
    };
    tracing::warn!(status, "provider request failed");
    Err(on_error(detail))
}
