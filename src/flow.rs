//! Login, callback and logout against the identity provider.
//!
//! [`AuthFlow`] is the one object an application builds at startup and
//! shares with every handler. It owns the resolved [`Config`], the provider
//! adapter and the cookie stores; nothing here is global.
//!
//! A browser moves through three states:
//!
//! ```text
//! Anonymous --login--> LoggingIn --callback--> Authenticated
//!     ^                    |                        |
//!     +----- failure ------+                        |
//!     +------------------- logout ------------------+
//! ```
//!
//! `LoggingIn` exists only as the transient cookie written by
//! [`AuthFlow::login`]; `Authenticated` only as the session cookie written by
//! [`AuthFlow::callback`].

use std::collections::BTreeMap;
use std::sync::Arc;

use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::Config;
use crate::error::Error;
use crate::oidc::{CodeExchange, OidcClient};
use crate::pkce::CODE_CHALLENGE_METHOD;
use crate::session::{Session, SessionStore};
use crate::token::{AccessTokenManager, AccessTokenRequest};
use crate::transient::{AuthorizationState, DEFAULT_TRANSIENT_MAX_AGE, TransientStore};
use crate::types::{AccessToken, Claims, filter_claims, now_unix};

/// Path of the vendor logout endpoint, relative to the issuer.
pub const VENDOR_LOGOUT_PATH: &str = "v2/logout";

/// Per-login options.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct LoginOptions {
    /// Where the callback sends the browser. Defaults to the base URL.
    pub return_to: Option<String>,
    /// Authorization parameters overriding the configured ones.
    pub authorization_params: BTreeMap<String, String>,
    /// Organization to log in to. Defaults to the configured one.
    pub organization: Option<String>,
    /// Application data handed back by the callback.
    pub custom_state: Option<Value>,
}

impl LoginOptions {
    #[must_use]
    pub fn with_return_to(mut self, return_to: impl Into<String>) -> Self {
        self.return_to = Some(return_to.into());
        self
    }

    #[must_use]
    pub fn with_authorization_param(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.authorization_params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    #[must_use]
    pub fn with_custom_state(mut self, custom_state: Value) -> Self {
        self.custom_state = Some(custom_state);
        self
    }
}

/// Authorization response, from the query string or a `form_post` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    #[must_use]
    pub fn new(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            state: Some(state.into()),
            ..Self::default()
        }
    }
}

/// A validated login, ready to become the session.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CallbackOutcome {
    pub session: Session,
    pub return_to: String,
    pub custom_state: Option<Value>,
}

/// Per-logout options.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct LogoutOptions {
    /// Where to land after logout. Defaults to the post-logout route, then
    /// the base URL.
    pub return_to: Option<String>,
    /// Extra end-session parameters. `None` values are left out of the
    /// query entirely; empty strings are sent as `key=`.
    pub logout_params: Vec<(String, Option<String>)>,
}

impl LogoutOptions {
    #[must_use]
    pub fn with_return_to(mut self, return_to: impl Into<String>) -> Self {
        self.return_to = Some(return_to.into());
        self
    }

    #[must_use]
    pub fn with_logout_param(mut self, key: impl Into<String>, value: Option<&str>) -> Self {
        self.logout_params.push((key.into(), value.map(str::to_string)));
        self
    }
}

/// The authentication client: login, callback, logout, session and token access.
pub struct AuthFlow<C> {
    config: Arc<Config>,
    client: Arc<C>,
    sessions: SessionStore,
    transient: TransientStore,
    tokens: AccessTokenManager<C>,
}

// Manual Clone: avoid derive adding a `C: Clone` bound.
impl<C> Clone for AuthFlow<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            client: Arc::clone(&self.client),
            sessions: self.sessions.clone(),
            transient: self.transient.clone(),
            tokens: self.tokens.clone(),
        }
    }
}

impl<C: OidcClient> AuthFlow<C> {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if cookie keys cannot be derived.
    pub fn new(config: Config, client: C) -> Result<Self, Error> {
        let client = Arc::new(client);
        let sessions = SessionStore::new(&config)?;
        let transient = TransientStore::new(&config)?;
        let tokens = AccessTokenManager::new(&config, sessions.clone(), Arc::clone(&client));
        Ok(Self {
            config: Arc::new(config),
            client,
            sessions,
            transient,
            tokens,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    // ── Login ──────────────────────────────────────────────────────

    /// Start a login: write the transient cookie and return the
    /// authorization URL to redirect to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the per-login parameters ask for a
    /// response type other than `code` or drop the `openid` scope, and
    /// propagates discovery failures.
    pub async fn login(
        &self,
        jar: CookieJar,
        options: LoginOptions,
    ) -> Result<(CookieJar, Url), Error> {
        self.login_at(jar, options, now_unix()).await
    }

    pub(crate) async fn login_at(
        &self,
        jar: CookieJar,
        options: LoginOptions,
        now: i64,
    ) -> Result<(CookieJar, Url), Error> {
        let metadata = self.client.discover().await?;
        let return_to = options
            .return_to
            .unwrap_or_else(|| self.config.base_url().to_string());
        let mut authorization_params = options.authorization_params;
        // an `organization` authorization param is the organization itself
        let organization = options
            .organization
            .or_else(|| authorization_params.remove("organization"))
            .or_else(|| self.config.organization().map(str::to_string));

        let (attempt, pkce) = AuthorizationState::generate(return_to, now);
        let attempt = attempt
            .with_custom_state(options.custom_state)
            .with_organization(organization);

        let mut params = self.authorization_params(authorization_params)?;
        if let Some(organization) = &attempt.organization {
            params.push(("organization".into(), organization.clone()));
        }
        params.push(("state".into(), attempt.state.clone()));
        params.push(("nonce".into(), attempt.nonce.clone()));
        params.push(("code_challenge".into(), pkce.challenge));
        params.push(("code_challenge_method".into(), CODE_CHALLENGE_METHOD.into()));

        let url = self.client.authorization_url(&metadata, &params)?;
        let jar = self.transient.issue(jar, &attempt, DEFAULT_TRANSIENT_MAX_AGE)?;
        tracing::info!(organization = ?attempt.organization, "login started");
        Ok((jar, url))
    }

    /// Configured authorization parameters with per-login overrides applied.
    fn authorization_params(
        &self,
        overrides: BTreeMap<String, String>,
    ) -> Result<Vec<(String, String)>, Error> {
        let configured = self.config.authorization_params();
        let mut merged: BTreeMap<String, String> = configured.extra.clone();
        merged.insert("response_type".into(), configured.response_type.clone());
        merged.insert(
            "response_mode".into(),
            configured.response_mode.as_str().into(),
        );
        merged.insert("scope".into(), configured.scope.clone());
        if let Some(audience) = &configured.audience {
            merged.insert("audience".into(), audience.clone());
        }
        merged.extend(overrides);

        if merged.get("response_type").map(String::as_str) != Some("code") {
            return Err(Error::Config("only response_type=code is supported".into()));
        }
        let has_openid = merged
            .get("scope")
            .is_some_and(|scope| scope.split_whitespace().any(|s| s == "openid"));
        if !has_openid {
            return Err(Error::Config("scope must contain \"openid\"".into()));
        }
        // bound to this client, never overridable
        for reserved in [
            "client_id",
            "redirect_uri",
            "state",
            "nonce",
            "code_challenge",
            "code_challenge_method",
            "organization",
        ] {
            merged.remove(reserved);
        }

        let mut params = vec![
            ("client_id".to_string(), self.config.client_id().to_string()),
            (
                "redirect_uri".to_string(),
                self.config.redirect_uri()?.to_string(),
            ),
        ];
        params.extend(merged);
        Ok(params)
    }

    // ── Callback ───────────────────────────────────────────────────

    /// Finish a login and write the session cookie.
    ///
    /// The returned jar always expires the transient cookie, on failure too.
    pub async fn callback(
        &self,
        jar: CookieJar,
        params: CallbackParams,
    ) -> (CookieJar, Result<CallbackOutcome, Error>) {
        let now = now_unix();
        let (jar, outcome) = self.handle_callback_at(jar, params, now).await;
        match outcome {
            Ok(mut outcome) => match self.establish_at(jar.clone(), &mut outcome, now) {
                Ok(jar) => (jar, Ok(outcome)),
                Err(e) => (jar, Err(e)),
            },
            Err(e) => (jar, Err(e)),
        }
    }

    /// Validate the authorization response and build the session without
    /// persisting it, for callers that inspect or amend it first.
    pub async fn handle_callback(
        &self,
        jar: CookieJar,
        params: CallbackParams,
    ) -> (CookieJar, Result<CallbackOutcome, Error>) {
        self.handle_callback_at(jar, params, now_unix()).await
    }

    pub(crate) async fn handle_callback_at(
        &self,
        jar: CookieJar,
        params: CallbackParams,
        now: i64,
    ) -> (CookieJar, Result<CallbackOutcome, Error>) {
        let (jar, attempt) = match params.state.as_deref() {
            Some(state) => self.transient.validate_and_consume_at(jar, state, now),
            None => (
                jar,
                Err(Error::InvalidState("callback has no state parameter".into())),
            ),
        };

        if let Some(error) = params.error {
            tracing::warn!(error = %error, description = ?params.error_description, "provider returned an authorization error");
            return (
                jar,
                Err(Error::Authorization {
                    error,
                    description: params.error_description,
                }),
            );
        }

        let result = match attempt {
            Ok(attempt) => self.complete(attempt, params.code, now).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::warn!(error = %e, "callback rejected");
        }
        (jar, result)
    }

    async fn complete(
        &self,
        attempt: AuthorizationState,
        code: Option<String>,
        now: i64,
    ) -> Result<CallbackOutcome, Error> {
        let code = code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::TokenExchange("callback has no authorization code".into()))?;
        let redirect_uri = self.config.redirect_uri()?;

        let tokens = self
            .client
            .exchange_code(CodeExchange {
                code: &code,
                code_verifier: attempt.code_verifier.as_deref(),
                redirect_uri: redirect_uri.as_str(),
            })
            .await
            .map_err(|e| match e {
                Error::TokenExchange(_) => e,
                other => Error::TokenExchange(other.to_string()),
            })?;

        let id_token = tokens
            .id_token
            .as_deref()
            .ok_or_else(|| Error::IdTokenValidation("token response has no id_token".into()))?;
        let claims = self
            .client
            .validate_id_token(id_token, Some(&attempt.nonce))
            .await
            .map_err(|e| match e {
                Error::IdTokenValidation(_) => e,
                other => Error::IdTokenValidation(other.to_string()),
            })?;
        check_claims(&claims, &attempt)?;

        let claims = filter_claims(claims, self.config.identity_claim_filter());
        let session =
            Session::from_tokens(tokens, claims, self.config.session().store_id_token, now);
        Ok(CallbackOutcome {
            session,
            return_to: attempt.return_to,
            custom_state: attempt.custom_state,
        })
    }

    /// Persist the session of a validated callback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionEncode`] if the session does not fit.
    pub fn establish(
        &self,
        jar: CookieJar,
        outcome: &mut CallbackOutcome,
    ) -> Result<CookieJar, Error> {
        self.establish_at(jar, outcome, now_unix())
    }

    fn establish_at(
        &self,
        jar: CookieJar,
        outcome: &mut CallbackOutcome,
        now: i64,
    ) -> Result<CookieJar, Error> {
        let jar = self.sessions.set_at(jar, &mut outcome.session, now)?;
        tracing::info!(sub = ?outcome.session.subject(), "login completed");
        Ok(jar)
    }

    // ── Logout ─────────────────────────────────────────────────────

    /// Delete the session and return where to send the browser.
    ///
    /// Logging out without a session is not an error; it lands on the
    /// return URL directly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the return URL cannot be resolved, and
    /// propagates discovery failures when identity-provider logout is on.
    pub async fn logout(
        &self,
        jar: CookieJar,
        options: LogoutOptions,
    ) -> Result<(CookieJar, Url), Error> {
        let session = self.sessions.get(&jar);
        let jar = self.sessions.delete(jar);

        let return_to = options
            .return_to
            .as_deref()
            .or(self.config.routes().post_logout_redirect.as_deref());
        let return_to = match return_to {
            Some(target) => self
                .config
                .base_url()
                .join(target)
                .map_err(|e| Error::Config(format!("logout returnTo: {e}")))?,
            None => self.config.base_url().clone(),
        };

        let Some(session) = session else {
            tracing::debug!("logout without a session");
            return Ok((jar, return_to));
        };
        if !self.config.idp_logout() {
            tracing::info!(sub = ?session.subject(), "logged out locally");
            return Ok((jar, return_to));
        }

        let metadata = self.client.discover().await?;
        let extra = options
            .logout_params
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| (key, value)));

        let url = if self.config.authok_logout() {
            let mut params = vec![
                ("client_id".to_string(), self.config.client_id().to_string()),
                ("returnTo".to_string(), registered_form(&return_to)),
            ];
            params.extend(extra);
            let endpoint = format!(
                "{}/{VENDOR_LOGOUT_PATH}",
                metadata.issuer.trim_end_matches('/')
            );
            crate::oidc::endpoint_with_params(&endpoint, &params)?
        } else {
            let mut params = vec![(
                "post_logout_redirect_uri".to_string(),
                registered_form(&return_to),
            )];
            if let Some(id_token) = &session.id_token {
                params.push(("id_token_hint".to_string(), id_token.clone()));
            }
            params.extend(extra);
            match self.client.end_session_url(&metadata, &params) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(error = %e, "identity provider logout unavailable, logging out locally");
                    return Ok((jar, return_to));
                }
            }
        };
        tracing::info!(sub = ?session.subject(), "logged out, redirecting to identity provider");
        Ok((jar, url))
    }

    // ── Session access ─────────────────────────────────────────────

    /// The current session, if the request carries a valid one.
    #[must_use]
    pub fn get_session(&self, jar: &CookieJar) -> Option<Session> {
        self.sessions.get(jar)
    }

    /// Re-write the session cookie so its rolling window starts now.
    ///
    /// Returns the jar unchanged when there is no session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionEncode`] if the session cannot be written.
    pub fn touch_session(&self, jar: CookieJar) -> Result<CookieJar, Error> {
        let now = now_unix();
        match self.sessions.get_at(&jar, now) {
            Some(mut session) => self.sessions.set_at(jar, &mut session, now),
            None => Ok(jar),
        }
    }

    /// See [`AccessTokenManager::get_access_token`].
    ///
    /// # Errors
    ///
    /// See [`AccessTokenManager::get_access_token`].
    pub async fn get_access_token(
        &self,
        jar: CookieJar,
        request: &AccessTokenRequest,
    ) -> Result<(AccessToken, CookieJar), Error> {
        self.tokens.get_access_token(jar, request).await
    }

    /// `candidate` if it is safe to redirect to: a path on this site, or an
    /// absolute URL with the base URL's origin.
    #[must_use]
    pub fn safe_return_to(&self, candidate: &str) -> Option<String> {
        let base = self.config.base_url();
        if candidate.starts_with('/') && !candidate.starts_with("//") && !candidate.contains('\\') {
            return base.join(candidate).ok().map(String::from);
        }
        Url::parse(candidate)
            .ok()
            .filter(|url| url.origin() == base.origin())
            .map(String::from)
    }
}

/// `url` as logout URLs are registered with providers: a bare origin has no
/// trailing slash (`https://example.org`, not `https://example.org/`).
fn registered_form(url: &Url) -> String {
    if url.path() == "/" && url.query().is_none() && url.fragment().is_none() {
        url.as_str().trim_end_matches('/').to_string()
    } else {
        url.to_string()
    }
}

/// Nonce and organization checks on validated claims.
fn check_claims(claims: &Claims, attempt: &AuthorizationState) -> Result<(), Error> {
    if claims.get("nonce").and_then(Value::as_str) != Some(attempt.nonce.as_str()) {
        return Err(Error::IdTokenValidation("nonce mismatch".into()));
    }
    if let Some(expected) = &attempt.organization {
        match claims.get("org_id").and_then(Value::as_str) {
            Some(actual) if actual == expected => {}
            Some(actual) => {
                return Err(Error::IdTokenValidation(format!(
                    "org_id {actual:?} does not match {expected:?}"
                )));
            }
            None => {
                return Err(Error::IdTokenValidation("org_id claim missing".into()));
            }
        }
    }
    Ok(())
}
