//! Configuration resolution.
//!
//! [`Config::resolve`] is a pure function of structured overrides and a
//! captured environment snapshot: overrides win over `AUTHOK_*` variables,
//! variables win over defaults. Everything is validated once, at construction,
//! and the resulting [`Config`] is immutable for the life of the process.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use axum_extra::extract::cookie::SameSite;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::error::Error;
use crate::secret::SecretSet;

const FALSEY: [&str; 5] = ["n", "no", "false", "0", "off"];

pub const DEFAULT_SESSION_NAME: &str = "appSession";
pub const DEFAULT_SCOPE: &str = "openid profile email";
pub const DEFAULT_ROLLING_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_ABSOLUTE_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_CLOCK_TOLERANCE: Duration = Duration::from_secs(60);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_ID_TOKEN_SIGNING_ALG: &str = "RS256";

/// ID-token claims that are OIDC housekeeping rather than identity.
pub const DEFAULT_IDENTITY_CLAIM_FILTER: [&str; 11] = [
    "aud", "iss", "iat", "exp", "nbf", "nonce", "azp", "auth_time", "s_hash", "at_hash",
    "c_hash",
];

/// `SameSite` attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    #[default]
    Lax,
    Strict,
    None,
}

impl SameSitePolicy {
    fn parse(value: &str) -> Result<Self, Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lax" => Ok(Self::Lax),
            "strict" => Ok(Self::Strict),
            "none" => Ok(Self::None),
            other => Err(Error::Config(format!("invalid SameSite value: {other}"))),
        }
    }
}

impl From<SameSitePolicy> for SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::None => SameSite::None,
        }
    }
}

/// How the identity provider returns the authorization response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    #[default]
    Query,
    FormPost,
}

impl ResponseMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::FormPost => "form_post",
        }
    }
}

/// A duration that can also be switched off, as accepted from overrides:
/// a number of seconds, `false` to disable, or `true` for the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationSetting {
    Seconds(u64),
    Enabled(bool),
}

impl DurationSetting {
    fn parse(value: &str) -> Self {
        match value.trim().parse::<u64>() {
            Ok(secs) => Self::Seconds(secs),
            Err(_) => Self::Enabled(parse_bool(value)),
        }
    }

    fn resolve(self, default: Duration) -> Option<Duration> {
        match self {
            Self::Seconds(secs) => Some(Duration::from_secs(secs)),
            Self::Enabled(true) => Some(default),
            Self::Enabled(false) => None,
        }
    }
}

/// One secret or a rotation list (newest first).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SecretInput {
    One(String),
    Many(Vec<String>),
}

impl SecretInput {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(secret) => vec![secret],
            Self::Many(secrets) => secrets,
        }
    }
}

// ── Overrides ──────────────────────────────────────────────────────

/// Structured configuration supplied by the application. Every field is
/// optional; unset fields fall back to the environment, then to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigOverrides {
    pub secret: Option<SecretInput>,
    #[serde(rename = "issuerBaseURL")]
    pub issuer_base_url: Option<String>,
    #[serde(rename = "baseURL")]
    pub base_url: Option<String>,
    #[serde(rename = "clientID")]
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Seconds.
    pub clock_tolerance: Option<u64>,
    /// Milliseconds.
    pub http_timeout: Option<u64>,
    pub enable_telemetry: Option<bool>,
    pub idp_logout: Option<bool>,
    pub authok_logout: Option<bool>,
    pub id_token_signing_alg: Option<String>,
    pub legacy_same_site_cookie: Option<bool>,
    pub identity_claim_filter: Option<Vec<String>>,
    pub organization: Option<String>,
    pub authorization_params: AuthorizationParamsOverrides,
    pub session: SessionOverrides,
    pub routes: RoutesOverrides,
}

impl ConfigOverrides {
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(SecretInput::One(secret.into()));
        self
    }

    #[must_use]
    pub fn with_secrets(mut self, secrets: Vec<String>) -> Self {
        self.secret = Some(SecretInput::Many(secrets));
        self
    }

    #[must_use]
    pub fn with_issuer_base_url(mut self, url: impl Into<String>) -> Self {
        self.issuer_base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthorizationParamsOverrides {
    pub response_type: Option<String>,
    pub response_mode: Option<ResponseMode>,
    pub scope: Option<String>,
    pub audience: Option<String>,
    /// Additional provider-specific parameters sent on every login.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionOverrides {
    pub name: Option<String>,
    pub rolling: Option<bool>,
    pub rolling_duration: Option<DurationSetting>,
    pub absolute_duration: Option<DurationSetting>,
    #[serde(rename = "storeIDToken")]
    pub store_id_token: Option<bool>,
    pub cookie: CookieOverrides,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CookieOverrides {
    pub domain: Option<String>,
    pub path: Option<String>,
    pub transient: Option<bool>,
    pub http_only: Option<bool>,
    pub secure: Option<bool>,
    pub same_site: Option<SameSitePolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoutesOverrides {
    pub login: Option<String>,
    pub callback: Option<String>,
    pub logout: Option<String>,
    pub profile: Option<String>,
    pub post_logout_redirect: Option<String>,
}

// ── Environment ────────────────────────────────────────────────────

/// Captured `AUTHOK_*` environment variables.
///
/// Reading the process environment happens only in [`EnvSnapshot::capture`],
/// which keeps [`Config::resolve`] deterministic and testable.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Snapshot the current process environment.
    #[must_use]
    pub fn capture() -> Self {
        std::env::vars()
            .filter(|(key, _)| key.starts_with("AUTHOK_"))
            .collect()
    }

    /// Empty values are treated as unset.
    fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(parse_bool)
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key).map(|v| {
            v.split(',')
                .map(|item| item.split_whitespace().collect::<String>())
                .filter(|item| !item.is_empty())
                .collect()
        })
    }

    fn number(&self, key: &str) -> Result<Option<u64>, Error> {
        self.get(key)
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .map_err(|e| Error::Config(format!("{key}: {e}")))
            })
            .transpose()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    !FALSEY.contains(&value.trim().to_ascii_lowercase().as_str())
}

// ── Resolved configuration ─────────────────────────────────────────

/// Authorization request parameters sent on every login.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthorizationParams {
    pub response_type: String,
    pub response_mode: ResponseMode,
    pub scope: String,
    pub audience: Option<String>,
    pub extra: BTreeMap<String, String>,
}

/// Attributes applied to the session and transient cookies.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CookieConfig {
    pub domain: Option<String>,
    pub path: String,
    /// Omit `Expires`/`Max-Age`, making the session end with the browser.
    pub transient: bool,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSitePolicy,
}

/// Session cookie name and lifetime policy.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SessionConfig {
    pub name: String,
    pub rolling: bool,
    /// Idle timeout, measured from the last write. `None` when not rolling.
    pub rolling_duration: Option<Duration>,
    /// Hard lifetime, measured from login. `None` when disabled.
    pub absolute_duration: Option<Duration>,
    pub store_id_token: bool,
    pub cookie: CookieConfig,
}

/// Paths served by the axum routes.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Routes {
    pub login: String,
    pub callback: String,
    pub logout: String,
    pub profile: String,
    pub post_logout_redirect: Option<String>,
}

/// Fully resolved, validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) secrets: SecretSet,
    pub(crate) issuer_base_url: Url,
    pub(crate) base_url: Url,
    pub(crate) client_id: String,
    pub(crate) client_secret: Option<SecretString>,
    pub(crate) clock_tolerance: Duration,
    pub(crate) http_timeout: Duration,
    pub(crate) enable_telemetry: bool,
    pub(crate) idp_logout: bool,
    pub(crate) authok_logout: bool,
    pub(crate) id_token_signing_alg: String,
    pub(crate) legacy_same_site_cookie: bool,
    pub(crate) identity_claim_filter: Vec<String>,
    pub(crate) organization: Option<String>,
    pub(crate) authorization_params: AuthorizationParams,
    pub(crate) session: SessionConfig,
    pub(crate) routes: Routes,
}

impl Config {
    /// Resolve configuration from the process environment only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required values are missing or invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::resolve(ConfigOverrides::default(), &EnvSnapshot::capture())
    }

    /// Merge `overrides` over `env` over defaults and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required values are missing or invalid.
    pub fn resolve(overrides: ConfigOverrides, env: &EnvSnapshot) -> Result<Self, Error> {
        let secrets = overrides
            .secret
            .map(SecretInput::into_vec)
            .or_else(|| env.get("AUTHOK_SECRET").map(|s| vec![s.to_string()]))
            .ok_or_else(|| Error::Config("secret is required (AUTHOK_SECRET)".into()))?;
        let secrets = SecretSet::new(secrets)?;

        let issuer_base_url = required_url(
            overrides.issuer_base_url.as_deref(),
            env.get("AUTHOK_ISSUER_BASE_URL"),
            "issuerBaseURL (AUTHOK_ISSUER_BASE_URL)",
        )?;
        let base_url = required_url(
            overrides.base_url.as_deref(),
            env.get("AUTHOK_BASE_URL"),
            "baseURL (AUTHOK_BASE_URL)",
        )?;
        let client_id = overrides
            .client_id
            .or_else(|| env.get("AUTHOK_CLIENT_ID").map(str::to_string))
            .ok_or_else(|| Error::Config("clientID is required (AUTHOK_CLIENT_ID)".into()))?;
        let client_secret = overrides
            .client_secret
            .or_else(|| env.get("AUTHOK_CLIENT_SECRET").map(str::to_string))
            .map(SecretString::from);

        let clock_tolerance = match overrides.clock_tolerance {
            Some(secs) => Duration::from_secs(secs),
            None => env
                .number("AUTHOK_CLOCK_TOLERANCE")?
                .map_or(DEFAULT_CLOCK_TOLERANCE, Duration::from_secs),
        };
        let http_timeout = match overrides.http_timeout {
            Some(ms) => Duration::from_millis(ms),
            None => env
                .number("AUTHOK_HTTP_TIMEOUT")?
                .map_or(DEFAULT_HTTP_TIMEOUT, Duration::from_millis),
        };

        let id_token_signing_alg = overrides
            .id_token_signing_alg
            .or_else(|| env.get("AUTHOK_ID_TOKEN_SIGNING_ALG").map(str::to_string))
            .unwrap_or_else(|| DEFAULT_ID_TOKEN_SIGNING_ALG.into());
        if id_token_signing_alg.starts_with("HS") && client_secret.is_none() {
            return Err(Error::Config(format!(
                "clientSecret is required for {id_token_signing_alg} ID tokens"
            )));
        }

        let authok_logout_default = issuer_base_url
            .host_str()
            .is_some_and(|host| host.ends_with("authok.cn"));

        let authorization_params =
            resolve_authorization_params(overrides.authorization_params, env)?;
        let session = resolve_session(overrides.session, env, &base_url)?;
        if authorization_params.response_mode == ResponseMode::FormPost && !session.cookie.secure
        {
            tracing::warn!(
                "response_mode=form_post needs SameSite=None transient cookies, which browsers only accept over https"
            );
        }

        let routes = RoutesOverrides {
            callback: overrides
                .routes
                .callback
                .or_else(|| env.get("AUTHOK_CALLBACK").map(str::to_string)),
            post_logout_redirect: overrides
                .routes
                .post_logout_redirect
                .or_else(|| env.get("AUTHOK_POST_LOGOUT_REDIRECT").map(str::to_string)),
            ..overrides.routes
        };

        Ok(Self {
            secrets,
            issuer_base_url,
            base_url,
            client_id,
            client_secret,
            clock_tolerance,
            http_timeout,
            enable_telemetry: overrides
                .enable_telemetry
                .or_else(|| env.bool("AUTHOK_ENABLE_TELEMETRY"))
                .unwrap_or(true),
            idp_logout: overrides
                .idp_logout
                .or_else(|| env.bool("AUTHOK_IDP_LOGOUT"))
                .unwrap_or(true),
            authok_logout: overrides
                .authok_logout
                .or_else(|| env.bool("AUTHOK_LOGOUT"))
                .unwrap_or(authok_logout_default),
            id_token_signing_alg,
            legacy_same_site_cookie: overrides
                .legacy_same_site_cookie
                .or_else(|| env.bool("AUTHOK_LEGACY_SAME_SITE_COOKIE"))
                .unwrap_or(false),
            identity_claim_filter: overrides
                .identity_claim_filter
                .or_else(|| env.list("AUTHOK_IDENTITY_CLAIM_FILTER"))
                .unwrap_or_else(|| {
                    DEFAULT_IDENTITY_CLAIM_FILTER
                        .iter()
                        .map(|c| (*c).to_string())
                        .collect()
                }),
            organization: overrides
                .organization
                .or_else(|| env.get("AUTHOK_ORGANIZATION").map(str::to_string)),
            authorization_params,
            session,
            routes: Routes {
                login: routes.login.unwrap_or_else(|| "/api/auth/login".into()),
                callback: routes
                    .callback
                    .unwrap_or_else(|| "/api/auth/callback".into()),
                logout: routes.logout.unwrap_or_else(|| "/api/auth/logout".into()),
                profile: routes.profile.unwrap_or_else(|| "/api/auth/me".into()),
                post_logout_redirect: routes.post_logout_redirect,
            },
        })
    }

    #[must_use]
    pub fn secrets(&self) -> &SecretSet {
        &self.secrets
    }

    #[must_use]
    pub fn issuer_base_url(&self) -> &Url {
        &self.issuer_base_url
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> Option<&SecretString> {
        self.client_secret.as_ref()
    }

    #[must_use]
    pub fn clock_tolerance(&self) -> Duration {
        self.clock_tolerance
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    #[must_use]
    pub fn enable_telemetry(&self) -> bool {
        self.enable_telemetry
    }

    #[must_use]
    pub fn idp_logout(&self) -> bool {
        self.idp_logout
    }

    /// Use the vendor `/v2/logout` convention instead of the discovered
    /// end-session endpoint.
    #[must_use]
    pub fn authok_logout(&self) -> bool {
        self.authok_logout
    }

    #[must_use]
    pub fn id_token_signing_alg(&self) -> &str {
        &self.id_token_signing_alg
    }

    #[must_use]
    pub fn legacy_same_site_cookie(&self) -> bool {
        self.legacy_same_site_cookie
    }

    #[must_use]
    pub fn identity_claim_filter(&self) -> &[String] {
        &self.identity_claim_filter
    }

    #[must_use]
    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    #[must_use]
    pub fn authorization_params(&self) -> &AuthorizationParams {
        &self.authorization_params
    }

    #[must_use]
    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    #[must_use]
    pub fn routes(&self) -> &Routes {
        &self.routes
    }

    /// Absolute callback URL registered with the identity provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the callback path cannot be joined onto the base URL.
    pub fn redirect_uri(&self) -> Result<Url, Error> {
        self.base_url
            .join(&self.routes.callback)
            .map_err(|e| Error::Config(format!("callback route: {e}")))
    }
}

fn required_url(
    overridden: Option<&str>,
    from_env: Option<&str>,
    what: &str,
) -> Result<Url, Error> {
    let raw = overridden
        .or(from_env)
        .ok_or_else(|| Error::Config(format!("{what} is required")))?;
    let raw = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    Url::parse(&raw).map_err(|e| Error::Config(format!("{what}: {e}")))
}

fn resolve_authorization_params(
    overrides: AuthorizationParamsOverrides,
    env: &EnvSnapshot,
) -> Result<AuthorizationParams, Error> {
    let response_type = overrides.response_type.unwrap_or_else(|| "code".into());
    if response_type != "code" {
        return Err(Error::Config(format!(
            "unsupported response_type {response_type:?}; only \"code\" is supported"
        )));
    }
    let scope = overrides
        .scope
        .or_else(|| env.get("AUTHOK_SCOPE").map(str::to_string))
        .unwrap_or_else(|| DEFAULT_SCOPE.into());
    if !scope.split_whitespace().any(|s| s == "openid") {
        return Err(Error::Config("scope must contain \"openid\"".into()));
    }
    Ok(AuthorizationParams {
        response_type,
        response_mode: overrides.response_mode.unwrap_or_default(),
        scope,
        audience: overrides
            .audience
            .or_else(|| env.get("AUTHOK_AUDIENCE").map(str::to_string)),
        extra: overrides.extra,
    })
}

fn resolve_session(
    overrides: SessionOverrides,
    env: &EnvSnapshot,
    base_url: &Url,
) -> Result<SessionConfig, Error> {
    let name = overrides
        .name
        .or_else(|| env.get("AUTHOK_SESSION_NAME").map(str::to_string))
        .unwrap_or_else(|| DEFAULT_SESSION_NAME.into());
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Config(
            "session name may only contain letters, numbers and underscores".into(),
        ));
    }

    let rolling = overrides
        .rolling
        .or_else(|| env.bool("AUTHOK_SESSION_ROLLING"))
        .unwrap_or(true);
    let rolling_setting = overrides.rolling_duration.or_else(|| {
        env.get("AUTHOK_SESSION_ROLLING_DURATION")
            .map(DurationSetting::parse)
    });
    let rolling_duration = match (rolling, rolling_setting) {
        (true, setting) => setting
            .unwrap_or(DurationSetting::Enabled(true))
            .resolve(DEFAULT_ROLLING_DURATION),
        (false, None | Some(DurationSetting::Enabled(false))) => None,
        (false, Some(_)) => {
            return Err(Error::Config(
                "rollingDuration must be disabled when rolling is false".into(),
            ));
        }
    };
    if rolling && rolling_duration.is_none() {
        return Err(Error::Config(
            "rollingDuration is required when rolling is true".into(),
        ));
    }
    let absolute_duration = overrides
        .absolute_duration
        .or_else(|| {
            env.get("AUTHOK_SESSION_ABSOLUTE_DURATION")
                .map(DurationSetting::parse)
        })
        .unwrap_or(DurationSetting::Enabled(true))
        .resolve(DEFAULT_ABSOLUTE_DURATION);
    if !rolling && absolute_duration.is_none() {
        return Err(Error::Config(
            "absoluteDuration is required when rolling is false".into(),
        ));
    }

    let cookie = overrides.cookie;
    let secure = cookie
        .secure
        .or_else(|| env.bool("AUTHOK_COOKIE_SECURE"))
        .unwrap_or(base_url.scheme() == "https");
    let same_site = match cookie.same_site {
        Some(policy) => policy,
        None => env
            .get("AUTHOK_COOKIE_SAME_SITE")
            .map(SameSitePolicy::parse)
            .transpose()?
            .unwrap_or_default(),
    };
    if same_site == SameSitePolicy::None && !secure {
        return Err(Error::Config(
            "SameSite=None cookies must also be secure".into(),
        ));
    }

    Ok(SessionConfig {
        name,
        rolling,
        rolling_duration,
        absolute_duration,
        store_id_token: overrides
            .store_id_token
            .or_else(|| env.bool("AUTHOK_SESSION_STORE_ID_TOKEN"))
            .unwrap_or(true),
        cookie: CookieConfig {
            domain: cookie
                .domain
                .or_else(|| env.get("AUTHOK_COOKIE_DOMAIN").map(str::to_string)),
            path: cookie
                .path
                .or_else(|| env.get("AUTHOK_COOKIE_PATH").map(str::to_string))
                .unwrap_or_else(|| "/".into()),
            transient: cookie
                .transient
                .or_else(|| env.bool("AUTHOK_COOKIE_TRANSIENT"))
                .unwrap_or(false),
            http_only: cookie
                .http_only
                .or_else(|| env.bool("AUTHOK_COOKIE_HTTP_ONLY"))
                .unwrap_or(true),
            secure,
            same_site,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> ConfigOverrides {
        ConfigOverrides::default()
            .with_secret("__test_session_secret__")
            .with_issuer_base_url("https://op.example.com")
            .with_base_url("https://example.org")
            .with_client_id("__test_client_id__")
    }

    #[test]
    fn defaults_are_applied() {
        let config = Config::resolve(required(), &EnvSnapshot::default()).unwrap();

        assert_eq!(config.session().name, "appSession");
        assert!(config.session().rolling);
        assert_eq!(
            config.session().rolling_duration,
            Some(DEFAULT_ROLLING_DURATION)
        );
        assert_eq!(
            config.session().absolute_duration,
            Some(DEFAULT_ABSOLUTE_DURATION)
        );
        assert!(config.session().cookie.secure);
        assert!(config.session().cookie.http_only);
        assert_eq!(config.session().cookie.same_site, SameSitePolicy::Lax);
        assert_eq!(config.authorization_params().scope, DEFAULT_SCOPE);
        assert_eq!(config.clock_tolerance(), DEFAULT_CLOCK_TOLERANCE);
        assert_eq!(config.http_timeout(), DEFAULT_HTTP_TIMEOUT);
        assert!(config.idp_logout());
        assert!(!config.authok_logout());
        assert_eq!(config.identity_claim_filter().len(), 11);
        assert_eq!(
            config.redirect_uri().unwrap().as_str(),
            "https://example.org/api/auth/callback"
        );
    }

    #[test]
    fn reads_environment_snapshot() {
        let env: EnvSnapshot = [
            ("AUTHOK_SECRET", "__env_session_secret__"),
            ("AUTHOK_ISSUER_BASE_URL", "https://tenant.cn.authok.cn"),
            ("AUTHOK_BASE_URL", "app.example.com"),
            ("AUTHOK_CLIENT_ID", "env-client"),
            ("AUTHOK_CLOCK_TOLERANCE", "30"),
            ("AUTHOK_SESSION_ROLLING_DURATION", "3600"),
            ("AUTHOK_SESSION_ABSOLUTE_DURATION", "false"),
            ("AUTHOK_IDENTITY_CLAIM_FILTER", "aud, iss ,nonce"),
            ("AUTHOK_COOKIE_SAME_SITE", "strict"),
        ]
        .into_iter()
        .collect();

        let config = Config::resolve(ConfigOverrides::default(), &env).unwrap();

        assert_eq!(config.base_url().as_str(), "https://app.example.com/");
        assert_eq!(config.client_id(), "env-client");
        assert_eq!(config.clock_tolerance(), Duration::from_secs(30));
        assert_eq!(
            config.session().rolling_duration,
            Some(Duration::from_secs(3600))
        );
        assert_eq!(config.session().absolute_duration, None);
        assert_eq!(config.identity_claim_filter(), ["aud", "iss", "nonce"]);
        assert_eq!(config.session().cookie.same_site, SameSitePolicy::Strict);
        assert!(config.authok_logout());
    }

    #[test]
    fn overrides_win_over_environment() {
        let env: EnvSnapshot = [("AUTHOK_CLIENT_ID", "env-client")].into_iter().collect();
        let config = Config::resolve(required(), &env).unwrap();
        assert_eq!(config.client_id(), "__test_client_id__");
    }

    #[test]
    fn missing_secret_is_a_config_error() {
        let mut overrides = required();
        overrides.secret = None;
        let err = Config::resolve(overrides, &EnvSnapshot::default()).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("secret")));
    }

    #[test]
    fn non_rolling_session_needs_absolute_duration() {
        let mut overrides = required();
        overrides.session.rolling = Some(false);
        overrides.session.absolute_duration = Some(DurationSetting::Enabled(false));
        assert!(Config::resolve(overrides, &EnvSnapshot::default()).is_err());

        let mut overrides = required();
        overrides.session.rolling = Some(false);
        overrides.session.rolling_duration = Some(DurationSetting::Seconds(60));
        assert!(Config::resolve(overrides, &EnvSnapshot::default()).is_err());

        let mut overrides = required();
        overrides.session.rolling = Some(false);
        let config = Config::resolve(overrides, &EnvSnapshot::default()).unwrap();
        assert_eq!(config.session().rolling_duration, None);
    }

    #[test]
    fn insecure_same_site_none_is_rejected() {
        let mut overrides = required().with_base_url("http://localhost:3000");
        overrides.session.cookie.same_site = Some(SameSitePolicy::None);
        assert!(Config::resolve(overrides, &EnvSnapshot::default()).is_err());
    }

    #[test]
    fn secure_defaults_to_base_url_scheme() {
        let config = Config::resolve(
            required().with_base_url("http://localhost:3000"),
            &EnvSnapshot::default(),
        )
        .unwrap();
        assert!(!config.session().cookie.secure);
    }

    #[test]
    fn invalid_session_name_is_rejected() {
        let mut overrides = required();
        overrides.session.name = Some("app-session".into());
        assert!(Config::resolve(overrides, &EnvSnapshot::default()).is_err());
    }

    #[test]
    fn symmetric_alg_requires_client_secret() {
        let mut overrides = required();
        overrides.id_token_signing_alg = Some("HS256".into());
        assert!(Config::resolve(overrides.clone(), &EnvSnapshot::default()).is_err());
        assert!(
            Config::resolve(
                overrides.with_client_secret("shh"),
                &EnvSnapshot::default()
            )
            .is_ok()
        );
    }

    #[test]
    fn deserializes_from_json() {
        let overrides: ConfigOverrides = serde_json::from_value(serde_json::json!({
            "secret": ["new-secret-value", "old-secret-value"],
            "issuerBaseURL": "https://op.example.com",
            "baseURL": "https://example.org",
            "clientID": "json-client",
            "session": { "absoluteDuration": false, "cookie": { "sameSite": "strict" } },
            "authorizationParams": { "response_mode": "form_post", "prompt": "login" }
        }))
        .unwrap();

        let config = Config::resolve(overrides, &EnvSnapshot::default()).unwrap();
        assert_eq!(config.secrets().len(), 2);
        assert_eq!(config.session().absolute_duration, None);
        assert_eq!(
            config.authorization_params().response_mode,
            ResponseMode::FormPost
        );
        assert_eq!(
            config.authorization_params().extra.get("prompt").map(String::as_str),
            Some("login")
        );
    }
}
