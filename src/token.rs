//! Access token manager.
//!
//! Hands the application a usable access token, running the refresh grant
//! when the stored one has expired (or a refresh is forced) and writing the
//! updated session back to the cookie.
//!
//! # Concurrent refreshes
//!
//! The session lives only in the browser's cookie, so two concurrent requests
//! that both find the token expired will both refresh it. Each response sets
//! its own session cookie and the browser keeps whichever arrives last. The
//! losing refresh is simply discarded: refresh is at-least-once, not
//! exactly-once. Providers that rotate refresh tokens with reuse detection may
//! revoke the family in this case; nothing here coordinates across requests.

use std::sync::Arc;

use axum_extra::extract::cookie::CookieJar;

use crate::config::Config;
use crate::error::Error;
use crate::oidc::OidcClient;
use crate::session::{Session, SessionStore};
use crate::types::{AccessToken, filter_claims, now_unix};

/// Options for [`AccessTokenManager::get_access_token`].
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct AccessTokenRequest {
    /// Scopes the token must carry.
    pub scopes: Vec<String>,
    /// Run the refresh grant even if the token has not expired.
    pub refresh: bool,
}

impl AccessTokenRequest {
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }
}

pub struct AccessTokenManager<C> {
    client: Arc<C>,
    store: SessionStore,
    clock_tolerance: i64,
    identity_claim_filter: Vec<String>,
    store_id_token: bool,
}

impl<C> Clone for AccessTokenManager<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            store: self.store.clone(),
            clock_tolerance: self.clock_tolerance,
            identity_claim_filter: self.identity_claim_filter.clone(),
            store_id_token: self.store_id_token,
        }
    }
}

impl<C: OidcClient> AccessTokenManager<C> {
    #[must_use]
    pub fn new(config: &Config, store: SessionStore, client: Arc<C>) -> Self {
        Self {
            client,
            store,
            clock_tolerance: i64::try_from(config.clock_tolerance().as_secs()).unwrap_or(0),
            identity_claim_filter: config.identity_claim_filter().to_vec(),
            store_id_token: config.session().store_id_token,
        }
    }

    /// The session's access token, refreshed first if needed.
    ///
    /// The returned jar carries the updated session cookie when a refresh
    /// happened, and is unchanged otherwise.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthenticated`] if the request has no session
    /// - [`Error::SessionDecode`] if the session cookie does not open
    /// - [`Error::InsufficientScope`] if the token lacks a requested scope
    /// - [`Error::AccessTokenExpired`] if a refresh is needed but impossible
    /// - [`Error::TokenRefresh`] if the provider rejects the refresh grant
    pub async fn get_access_token(
        &self,
        jar: CookieJar,
        request: &AccessTokenRequest,
    ) -> Result<(AccessToken, CookieJar), Error> {
        self.get_access_token_at(jar, request, now_unix()).await
    }

    pub(crate) async fn get_access_token_at(
        &self,
        jar: CookieJar,
        request: &AccessTokenRequest,
        now: i64,
    ) -> Result<(AccessToken, CookieJar), Error> {
        let mut session = self
            .store
            .load_at(&jar, now)?
            .ok_or(Error::Unauthenticated)?;
        if self.ensure_fresh(&mut session, request, now).await? {
            let jar = self.store.set_at(jar, &mut session, now)?;
            return Ok((session.access_token(), jar));
        }
        Ok((session.access_token(), jar))
    }

    /// Refresh `session` in place if its token is expired or a refresh is
    /// requested. Returns whether it changed.
    ///
    /// # Errors
    ///
    /// See [`get_access_token`](Self::get_access_token).
    pub async fn ensure_fresh(
        &self,
        session: &mut Session,
        request: &AccessTokenRequest,
        now: i64,
    ) -> Result<bool, Error> {
        check_scopes(session, &request.scopes)?;

        let expired = session.access_token_expired(now, self.clock_tolerance);
        if !expired && !request.refresh {
            return Ok(false);
        }
        let Some(refresh_token) = session.refresh_token.clone() else {
            tracing::debug!(forced = request.refresh, "no refresh token for expired access token");
            return Err(Error::AccessTokenExpired);
        };

        let tokens = self.client.refresh(&refresh_token).await.map_err(|e| {
            tracing::warn!(error = %e, "access token refresh failed");
            match e {
                Error::TokenRefresh(_) => e,
                other => Error::TokenRefresh(other.to_string()),
            }
        })?;

        let id_token = tokens.id_token.clone();
        session.apply_refresh(tokens, now);
        if let Some(id_token) = id_token {
            let claims = self.client.validate_id_token(&id_token, None).await?;
            session.claims = filter_claims(claims, &self.identity_claim_filter);
            if self.store_id_token {
                session.id_token = Some(id_token);
            }
        }
        tracing::debug!(expires_at = session.access_token_expires_at, "access token refreshed");
        Ok(true)
    }
}

fn check_scopes(session: &Session, requested: &[String]) -> Result<(), Error> {
    if requested.is_empty() {
        return Ok(());
    }
    let granted: Vec<&str> = session
        .access_token_scope
        .as_deref()
        .map(|scope| scope.split_whitespace().collect())
        .unwrap_or_default();
    let missing: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|scope| !granted.contains(scope))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::InsufficientScope(missing.join(" ")))
    }
}
