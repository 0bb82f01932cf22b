use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::{Duration, OffsetDateTime};

use crate::config::CookieConfig;

/// Name of the fallback cookie written without a `SameSite` attribute.
pub(crate) fn legacy_name(name: &str) -> String {
    format!("_{name}")
}

/// Attributes shared by every cookie this crate writes.
#[derive(Debug, Clone)]
pub(crate) struct CookieAttributes {
    domain: Option<String>,
    path: String,
    http_only: bool,
    secure: bool,
    same_site: Option<SameSite>,
}

impl CookieAttributes {
    pub(crate) fn from_config(config: &CookieConfig) -> Self {
        Self {
            domain: config.domain.clone(),
            path: config.path.clone(),
            http_only: config.http_only,
            secure: config.secure,
            same_site: Some(config.same_site.into()),
        }
    }

    /// Same attributes for the legacy duplicate: no `SameSite` at all.
    pub(crate) fn without_same_site(&self) -> Self {
        Self {
            same_site: None,
            ..self.clone()
        }
    }

    #[must_use]
    pub(crate) fn with_same_site(mut self, same_site: SameSite) -> Self {
        if same_site == SameSite::None {
            self.secure = true;
        }
        self.same_site = Some(same_site);
        self
    }

    #[must_use]
    pub(crate) fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    fn base(&self, name: String, value: String) -> Cookie<'static> {
        let mut cookie = Cookie::new(name, value);
        cookie.set_path(self.path.clone());
        if let Some(domain) = &self.domain {
            cookie.set_domain(domain.clone());
        }
        cookie.set_http_only(self.http_only);
        cookie.set_secure(self.secure);
        if let Some(same_site) = self.same_site {
            cookie.set_same_site(same_site);
        }
        cookie
    }

    /// Cookie expiring at `expires`, or at the end of the browser session when `None`.
    pub(crate) fn expiring_at(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
        expires: Option<OffsetDateTime>,
    ) -> Cookie<'static> {
        let mut cookie = self.base(name.into(), value.into());
        if let Some(expires) = expires {
            cookie.set_expires(expires);
        }
        cookie
    }

    /// Cookie living for `max_age`.
    pub(crate) fn lasting(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
        max_age: Duration,
    ) -> Cookie<'static> {
        let mut cookie = self.base(name.into(), value.into());
        cookie.set_max_age(max_age);
        cookie
    }

    /// Empty, already-expired cookie that overwrites `name` in the browser.
    pub(crate) fn removal(&self, name: impl Into<String>) -> Cookie<'static> {
        let mut cookie = self.base(name.into(), String::new());
        cookie.set_max_age(Duration::ZERO);
        cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
        cookie
    }
}

/// Value of cookie `name`, treating an emptied cookie as absent.
pub(crate) fn value_of(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
