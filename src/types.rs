use serde::{Deserialize, Serialize};

/// Identity claims as received from (and stored after) an ID token.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Current time in unix seconds.
#[must_use]
pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Access token handed to the application by the access token manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct AccessToken {
    pub token: String,
    pub token_type: String,
    /// Unix seconds.
    pub expires_at: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Remove `filter`ed claims (OIDC housekeeping) before a session is stored.
#[must_use]
pub fn filter_claims(mut claims: Claims, filter: &[String]) -> Claims {
    for name in filter {
        claims.remove(name);
    }
    claims
}
