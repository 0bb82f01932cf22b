//! The long-lived session and its cookie store.
//!
//! A session lives entirely inside the browser's cookie: there is no
//! server-side copy, so reading is decrypting and writing is re-encrypting.

use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::codec::{CookieCodec, chunk_name};
use crate::config::{Config, SessionConfig};
use crate::cookies::{self, CookieAttributes, legacy_name};
use crate::error::Error;
use crate::oidc::TokenSet;
use crate::secret::KeyPurpose;
use crate::types::{AccessToken, Claims, now_unix};

/// Access-token lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_ACCESS_TOKEN_LIFETIME: i64 = 3600;

/// An authenticated user's session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Session {
    /// ID-token claims with OIDC housekeeping claims removed.
    pub claims: Claims,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Raw ID token, kept only when `store_id_token` is on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub token_type: String,
    /// Unix seconds.
    pub access_token_expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_scope: Option<String>,
    /// Unix seconds; start of the absolute lifetime.
    pub created_at: i64,
    /// Unix seconds; start of the current rolling window.
    pub updated_at: i64,
}

impl Session {
    /// Build a fresh session from a token response and validated claims.
    #[must_use]
    pub fn from_tokens(tokens: TokenSet, claims: Claims, store_id_token: bool, now: i64) -> Self {
        Self {
            claims,
            access_token_expires_at: expires_at(&tokens, now),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            id_token: tokens.id_token.filter(|_| store_id_token),
            token_type: tokens.token_type,
            access_token_scope: tokens.scope,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a refresh-grant response. A rotated refresh token replaces the
    /// old one; an absent one keeps it.
    pub(crate) fn apply_refresh(&mut self, tokens: TokenSet, now: i64) {
        self.access_token_expires_at = expires_at(&tokens, now);
        self.access_token = tokens.access_token;
        self.token_type = tokens.token_type;
        if let Some(refresh_token) = tokens.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if tokens.scope.is_some() {
            self.access_token_scope = tokens.scope;
        }
    }

    /// Whether the access token is expired once `tolerance_secs` of clock
    /// skew are taken off its lifetime.
    #[must_use]
    pub fn access_token_expired(&self, now: i64, tolerance_secs: i64) -> bool {
        self.access_token_expires_at.saturating_sub(tolerance_secs) <= now
    }

    #[must_use]
    pub fn access_token(&self) -> AccessToken {
        AccessToken {
            token: self.access_token.clone(),
            token_type: self.token_type.clone(),
            expires_at: self.access_token_expires_at,
            scope: self.access_token_scope.clone(),
        }
    }

    /// The `sub` claim, if present.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.claims.get("sub").and_then(|v| v.as_str())
    }
}

fn expires_at(tokens: &TokenSet, now: i64) -> i64 {
    let lifetime = tokens
        .expires_in
        .and_then(|secs| i64::try_from(secs).ok())
        .unwrap_or(DEFAULT_ACCESS_TOKEN_LIFETIME);
    now.saturating_add(lifetime)
}

/// Reads, writes and deletes the session cookie chunk set.
///
/// Immutable after construction and safe to share across requests.
#[derive(Debug, Clone)]
pub struct SessionStore {
    codec: CookieCodec,
    config: SessionConfig,
    attributes: CookieAttributes,
    legacy_same_site: bool,
}

impl SessionStore {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if key derivation fails.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let session = config.session().clone();
        let attributes = CookieAttributes::from_config(&session.cookie);
        let codec = CookieCodec::new(config.secrets(), KeyPurpose::Session)?;
        let mut store = Self {
            codec,
            config: session,
            attributes,
            legacy_same_site: config.legacy_same_site_cookie(),
        };
        let budget = store.chunk_budget();
        store.codec = store.codec.with_chunk_size(budget);
        Ok(store)
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Value bytes left for one chunk once the name and attributes of the
    /// longest chunk cookie are taken out of the browser limit.
    fn chunk_budget(&self) -> usize {
        let widest = chunk_name(&self.config.name, self.codec.max_chunks());
        let far_future = OffsetDateTime::UNIX_EPOCH + time::Duration::days(365 * 1000);
        let overhead = self
            .attributes
            .expiring_at(widest, "", Some(far_future))
            .to_string()
            .len();
        crate::codec::BROWSER_COOKIE_LIMIT.saturating_sub(overhead)
    }

    /// The current session, or `None` when absent, forged, corrupt or expired.
    #[must_use]
    pub fn get(&self, jar: &CookieJar) -> Option<Session> {
        self.get_at(jar, now_unix())
    }

    /// [`get`](Self::get) against an explicit clock.
    #[must_use]
    pub fn get_at(&self, jar: &CookieJar, now: i64) -> Option<Session> {
        self.load_at(jar, now).unwrap_or_else(|e| {
            tracing::debug!(cookie = %self.config.name, error = %e, "ignoring session cookie");
            None
        })
    }

    /// Like [`get`](Self::get), but tells a cookie that fails to open apart
    /// from no cookie at all.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionDecode`] if a session cookie is present but is
    /// forged, corrupt, sealed with an unknown secret or missing chunks.
    pub fn load(&self, jar: &CookieJar) -> Result<Option<Session>, Error> {
        self.load_at(jar, now_unix())
    }

    pub(crate) fn load_at(&self, jar: &CookieJar, now: i64) -> Result<Option<Session>, Error> {
        let lookup = |name: &str| cookies::value_of(jar, name);
        let legacy = legacy_name(&self.config.name);
        let decoded = self
            .codec
            .decode::<Session, _>(&self.config.name, &lookup)
            .or_else(|| {
                self.legacy_same_site
                    .then(|| self.codec.decode::<Session, _>(&legacy, &lookup))
                    .flatten()
            });
        let Some(decoded) = decoded else {
            let present = lookup(&self.config.name).is_some()
                || (self.legacy_same_site && lookup(&legacy).is_some());
            return if present {
                Err(Error::SessionDecode)
            } else {
                Ok(None)
            };
        };

        let session = decoded.value;
        match self.expires_at(&session) {
            Some(deadline) if now > deadline => {
                tracing::debug!(deadline, now, "session expired");
                Ok(None)
            }
            _ => Ok(Some(session)),
        }
    }

    /// Persist `session`, refreshing its rolling window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionEncode`] if the session cannot be sealed or
    /// does not fit in the maximum number of chunks.
    pub fn set(&self, jar: CookieJar, session: &mut Session) -> Result<CookieJar, Error> {
        self.set_at(jar, session, now_unix())
    }

    /// [`set`](Self::set) against an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set).
    pub fn set_at(
        &self,
        jar: CookieJar,
        session: &mut Session,
        now: i64,
    ) -> Result<CookieJar, Error> {
        session.updated_at = now;
        let expires = if self.config.cookie.transient {
            None
        } else {
            self.expires_at(session)
                .and_then(|deadline| OffsetDateTime::from_unix_timestamp(deadline).ok())
        };
        let chunks = self.codec.encode(&self.config.name, session, now)?;

        let mut jar = self.write_chunks(jar, &self.config.name, &chunks, &self.attributes, expires);
        if self.legacy_same_site {
            let legacy = legacy_name(&self.config.name);
            let legacy_chunks: Vec<(String, String)> = chunks
                .iter()
                .enumerate()
                .map(|(index, (_, value))| (chunk_name(&legacy, index), value.clone()))
                .collect();
            jar = self.write_chunks(
                jar,
                &legacy,
                &legacy_chunks,
                &self.attributes.without_same_site(),
                expires,
            );
        }
        Ok(jar)
    }

    fn write_chunks(
        &self,
        mut jar: CookieJar,
        base: &str,
        chunks: &[(String, String)],
        attributes: &CookieAttributes,
        expires: Option<OffsetDateTime>,
    ) -> CookieJar {
        let previous = self.chunks_present(&jar, base);
        for (name, value) in chunks {
            jar = jar.add(attributes.expiring_at(name.clone(), value.clone(), expires));
        }
        for index in chunks.len()..previous {
            jar = jar.add(attributes.removal(chunk_name(base, index)));
        }
        jar
    }

    /// One past the highest chunk index of `base` the request carries.
    fn chunks_present(&self, jar: &CookieJar, base: &str) -> usize {
        (0..self.codec.max_chunks())
            .rev()
            .find(|&index| cookies::value_of(jar, &chunk_name(base, index)).is_some())
            .map_or(0, |index| index + 1)
    }

    /// Expire every chunk the session could occupy, whether or not the
    /// request carried it.
    #[must_use]
    pub fn delete(&self, mut jar: CookieJar) -> CookieJar {
        for index in 0..self.codec.max_chunks() {
            jar = jar.add(self.attributes.removal(chunk_name(&self.config.name, index)));
        }
        if self.legacy_same_site {
            let legacy = legacy_name(&self.config.name);
            let attributes = self.attributes.without_same_site();
            for index in 0..self.codec.max_chunks() {
                jar = jar.add(attributes.removal(chunk_name(&legacy, index)));
            }
        }
        jar
    }

    /// The earlier of the rolling and absolute deadlines, if any is configured.
    fn expires_at(&self, session: &Session) -> Option<i64> {
        let secs = |d: std::time::Duration| i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
        let rolling = self
            .config
            .rolling_duration
            .map(|d| session.updated_at.saturating_add(secs(d)));
        let absolute = self
            .config
            .absolute_duration
            .map(|d| session.created_at.saturating_add(secs(d)));
        match (rolling, absolute) {
            (Some(rolling), Some(absolute)) => Some(rolling.min(absolute)),
            (rolling, absolute) => rolling.or(absolute),
        }
    }
}
