//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde_json::Value;
use url::Url;

use crate::config::{Config, ConfigOverrides, EnvSnapshot};
use crate::error::Error;
use crate::oidc::{CodeExchange, OidcClient, TokenSet};
use crate::types::Claims;
use crate::well_known::ProviderMetadata;

pub(crate) const ISSUER: &str = "https://op.example.com";
pub(crate) const BASE_URL: &str = "https://example.org";
pub(crate) const CLIENT_ID: &str = "__test_client_id__";

pub(crate) fn overrides() -> ConfigOverrides {
    ConfigOverrides::default()
        .with_secret("__test_session_secret__")
        .with_issuer_base_url(ISSUER)
        .with_base_url(BASE_URL)
        .with_client_id(CLIENT_ID)
}

pub(crate) fn config() -> Config {
    resolve(overrides())
}

pub(crate) fn resolve(overrides: ConfigOverrides) -> Config {
    Config::resolve(overrides, &EnvSnapshot::default()).expect("valid test config")
}

/// `Set-Cookie` headers the jar would emit, parsed back into cookies and
/// sorted by name.
pub(crate) fn set_cookies(jar: &CookieJar) -> Vec<Cookie<'static>> {
    let response = jar.clone().into_response();
    let mut cookies: Vec<Cookie<'static>> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|value| {
            Cookie::parse(value.to_str().expect("ascii header").to_string())
                .expect("valid set-cookie")
        })
        .collect();
    cookies.sort_by(|a, b| a.name().cmp(b.name()));
    cookies
}

/// The cookie named `name` among `cookies`.
pub(crate) fn named<'a>(cookies: &'a [Cookie<'static>], name: &str) -> &'a Cookie<'static> {
    cookies
        .iter()
        .find(|c| c.name() == name)
        .unwrap_or_else(|| panic!("no cookie named {name}"))
}

/// Jar as a browser would present it on the next request: every cookie
/// still holding a value, sent back in a `Cookie` header.
pub(crate) fn next_request(jar: &CookieJar) -> CookieJar {
    let header = jar
        .iter()
        .filter(|c| !c.value().is_empty())
        .map(|c| format!("{}={}", c.name(), c.value()))
        .collect::<Vec<_>>()
        .join("; ");
    let mut headers = HeaderMap::new();
    if !header.is_empty() {
        headers.insert(COOKIE, HeaderValue::from_str(&header).expect("valid cookie header"));
    }
    CookieJar::from_headers(&headers)
}

/// Scriptable identity provider.
///
/// The code grant answers with `tokens`; ID-token validation returns `claims`
/// after the same nonce comparison a real adapter performs.
pub(crate) struct FakeProvider {
    metadata: ProviderMetadata,
    tokens: Mutex<TokenSet>,
    claims: Mutex<Claims>,
    exchanges: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self {
            metadata: ProviderMetadata::new(
                format!("{ISSUER}/"),
                format!("{ISSUER}/authorize"),
                format!("{ISSUER}/oauth/token"),
            )
            .with_end_session_endpoint(format!("{ISSUER}/session/end")),
            tokens: Mutex::new(
                TokenSet::new("access-token-1")
                    .with_expires_in(3600)
                    .with_refresh_token("refresh-token-1")
                    .with_id_token("id-token-1")
                    .with_scope("openid profile email"),
            ),
            claims: Mutex::new(Claims::new()),
            exchanges: Mutex::default(),
        }
    }

    pub(crate) fn without_end_session(mut self) -> Self {
        self.metadata.end_session_endpoint = None;
        self
    }

    /// Claims the next ID token will carry.
    pub(crate) fn set_claims(&self, claims: Value) {
        if let Value::Object(claims) = claims {
            *self.claims.lock().expect("claims lock") = claims;
        }
    }

    pub(crate) fn set_tokens(&self, tokens: TokenSet) {
        *self.tokens.lock().expect("tokens lock") = tokens;
    }

    /// `(code, code_verifier)` of every code exchange so far.
    pub(crate) fn exchanges(&self) -> Vec<(String, Option<String>)> {
        self.exchanges.lock().expect("exchanges lock").clone()
    }
}

impl OidcClient for FakeProvider {
    async fn discover(&self) -> Result<Arc<ProviderMetadata>, Error> {
        Ok(Arc::new(self.metadata.clone()))
    }

    async fn exchange_code(&self, exchange: CodeExchange<'_>) -> Result<TokenSet, Error> {
        self.exchanges.lock().expect("exchanges lock").push((
            exchange.code.to_string(),
            exchange.code_verifier.map(str::to_string),
        ));
        Ok(self.tokens.lock().expect("tokens lock").clone())
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, Error> {
        Err(Error::TokenRefresh("400 invalid_grant".into()))
    }

    async fn validate_id_token(
        &self,
        _id_token: &str,
        nonce: Option<&str>,
    ) -> Result<Claims, Error> {
        let claims = self.claims.lock().expect("claims lock").clone();
        if let Some(expected) = nonce {
            if claims.get("nonce").and_then(Value::as_str) != Some(expected) {
                return Err(Error::IdTokenValidation("nonce mismatch".into()));
            }
        }
        Ok(claims)
    }
}

/// Query parameter `key` of `url`.
pub(crate) fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}
