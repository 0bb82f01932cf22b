//! Single-use login-attempt cookies.
//!
//! Each login writes one cookie named `auth_verification.<state>` carrying
//! the [`AuthorizationState`] sealed under the transient key. The callback
//! consumes it: whatever the outcome, the cookie is expired in the same
//! response, so a replayed callback finds nothing to validate against.
//! Starting a login also expires all but the newest [`MAX_PENDING_LOGINS`]
//! attempts, so abandoned logins cannot pile up in the `Cookie` header.

use std::collections::BTreeMap;

use axum_extra::extract::cookie::{CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::CookieCodec;
use crate::config::{Config, ResponseMode};
use crate::cookies::{self, CookieAttributes, legacy_name};
use crate::error::Error;
use crate::pkce::{PkcePair, generate_nonce, generate_state};
use crate::secret::KeyPurpose;
use crate::types::now_unix;

/// Prefix of the transient cookie name; the state value follows it.
pub const TRANSIENT_COOKIE_PREFIX: &str = "auth_verification";

/// Lifetime of a login attempt, in seconds.
pub const DEFAULT_TRANSIENT_MAX_AGE: i64 = 60 * 60;

/// Login attempts a browser may have in flight at once, the new one included.
/// Older ones are expired when another login starts.
pub const MAX_PENDING_LOGINS: usize = 3;

/// One login attempt, from `/login` to `/callback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct AuthorizationState {
    pub state: String,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    pub return_to: String,
    /// Opaque application data handed back after the callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    pub issued_at: i64,
    pub max_age: i64,
}

impl AuthorizationState {
    /// Fresh random `state` and `nonce`, plus a PKCE pair whose verifier is
    /// kept here and whose challenge is returned for the authorization URL.
    #[must_use]
    pub fn generate(return_to: impl Into<String>, now: i64) -> (Self, PkcePair) {
        let pkce = PkcePair::generate();
        let state = Self {
            state: generate_state(),
            nonce: generate_nonce(),
            code_verifier: Some(pkce.verifier.clone()),
            return_to: return_to.into(),
            custom_state: None,
            organization: None,
            issued_at: now,
            max_age: DEFAULT_TRANSIENT_MAX_AGE,
        };
        (state, pkce)
    }

    #[must_use]
    pub fn with_custom_state(mut self, custom_state: Option<Value>) -> Self {
        self.custom_state = custom_state;
        self
    }

    #[must_use]
    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization;
        self
    }

    fn expired(&self, now: i64) -> bool {
        now > self.issued_at.saturating_add(self.max_age)
    }
}

fn cookie_name(state: &str) -> String {
    format!("{TRANSIENT_COOKIE_PREFIX}.{state}")
}

/// Issues and consumes transient login cookies.
#[derive(Debug, Clone)]
pub struct TransientStore {
    codec: CookieCodec,
    attributes: CookieAttributes,
    legacy_same_site: bool,
}

impl TransientStore {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if key derivation fails.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let cookie = &config.session().cookie;
        let mut attributes = CookieAttributes::from_config(cookie).with_http_only(true);
        if config.authorization_params().response_mode == ResponseMode::FormPost {
            // the provider POSTs back cross-site
            attributes = attributes.with_same_site(SameSite::None);
        }
        Ok(Self {
            codec: CookieCodec::new(config.secrets(), KeyPurpose::Transient)?,
            attributes,
            legacy_same_site: config.legacy_same_site_cookie(),
        })
    }

    /// Write `state` to the jar, living at most `max_age` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionEncode`] if the state cannot be sealed.
    pub fn issue(
        &self,
        jar: CookieJar,
        state: &AuthorizationState,
        max_age: i64,
    ) -> Result<CookieJar, Error> {
        let mut state = state.clone();
        state.max_age = max_age;
        let sealed = self.codec.seal(&state, state.issued_at)?;
        let name = cookie_name(&state.state);
        let max_age = time::Duration::seconds(max_age);

        let mut jar = self
            .prune(jar, MAX_PENDING_LOGINS - 1)
            .add(self.attributes.lasting(name.clone(), sealed.clone(), max_age));
        if self.legacy_same_site {
            jar = jar.add(self.attributes.without_same_site().lasting(
                legacy_name(&name),
                sealed,
                max_age,
            ));
        }
        Ok(jar)
    }

    /// Expire all but the `keep` most recently issued attempts in `jar`.
    /// Cookies that do not open count as oldest.
    fn prune(&self, mut jar: CookieJar, keep: usize) -> CookieJar {
        let prefix = format!("{TRANSIENT_COOKIE_PREFIX}.");
        let mut pending: BTreeMap<String, i64> = BTreeMap::new();
        for cookie in jar.iter() {
            let name = cookie.name().strip_prefix('_').unwrap_or(cookie.name());
            if !name.starts_with(&prefix) || cookie.value().is_empty() {
                continue;
            }
            let issued_at = self
                .codec
                .open::<AuthorizationState>(cookie.value())
                .map_or(i64::MIN, |decoded| decoded.issued_at);
            let newest = pending.entry(name.to_string()).or_insert(issued_at);
            *newest = (*newest).max(issued_at);
        }
        if pending.len() <= keep {
            return jar;
        }

        let mut pending: Vec<(String, i64)> = pending.into_iter().collect();
        pending.sort_by(|a, b| b.1.cmp(&a.1));
        for (name, _) in pending.into_iter().skip(keep) {
            tracing::debug!(cookie = %name, "expiring abandoned login attempt");
            let legacy = legacy_name(&name);
            if self.legacy_same_site || jar.get(&legacy).is_some() {
                jar = jar.add(self.attributes.without_same_site().removal(legacy));
            }
            jar = jar.add(self.attributes.removal(name));
        }
        jar
    }

    /// Look up and open the cookie for `expected_state`, then expire it.
    ///
    /// The returned jar always carries the removal, including on failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if no cookie for the state exists, it
    /// does not authenticate, its embedded state differs, or it has expired.
    pub fn validate_and_consume(
        &self,
        jar: CookieJar,
        expected_state: &str,
    ) -> (CookieJar, Result<AuthorizationState, Error>) {
        self.validate_and_consume_at(jar, expected_state, now_unix())
    }

    pub(crate) fn validate_and_consume_at(
        &self,
        jar: CookieJar,
        expected_state: &str,
        now: i64,
    ) -> (CookieJar, Result<AuthorizationState, Error>) {
        let name = cookie_name(expected_state);
        let legacy = legacy_name(&name);
        let raw = cookies::value_of(&jar, &name).or_else(|| {
            self.legacy_same_site
                .then(|| cookies::value_of(&jar, &legacy))
                .flatten()
        });

        let mut jar = jar.add(self.attributes.removal(name));
        if self.legacy_same_site {
            jar = jar.add(self.attributes.without_same_site().removal(legacy));
        }

        let result = match raw {
            None => Err(Error::InvalidState("no login in progress for this state".into())),
            Some(raw) => match self.codec.open::<AuthorizationState>(&raw) {
                None => Err(Error::InvalidState("login state cookie is invalid".into())),
                Some(decoded) if decoded.value.state != expected_state => {
                    Err(Error::InvalidState("state mismatch".into()))
                }
                Some(decoded) if decoded.value.expired(now) => {
                    Err(Error::InvalidState("login attempt expired".into()))
                }
                Some(decoded) => Ok(decoded.value),
            },
        };
        (jar, result)
    }
}
