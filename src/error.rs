/// Errors produced by the session layer and the login flow.
///
/// Only [`Error::Config`] is fatal, and only at construction time. Every other
/// variant belongs to a single request and is turned into a redirect or an
/// HTTP error response by the caller.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or missing configuration (e.g. no secret).
    #[error("configuration error: {0}")]
    Config(String),

    /// The transient login cookie is missing, mismatched, expired or already used.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The identity provider answered the callback with an `error` parameter.
    #[error("authorization error: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Authorization {
        error: String,
        description: Option<String>,
    },

    /// The token endpoint rejected the authorization-code grant.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// The token endpoint rejected the refresh-token grant.
    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    /// Signature, issuer, audience, expiry, nonce or organization mismatch.
    #[error("id token validation failed: {0}")]
    IdTokenValidation(String),

    /// The session cookie could not be authenticated or decoded.
    #[error("session cookie could not be decoded")]
    SessionDecode,

    /// The session could not be written into cookies.
    #[error("session cookie could not be encoded: {0}")]
    SessionEncode(String),

    /// The access token expired and no refresh token is available.
    #[error("access token expired and cannot be refreshed")]
    AccessTokenExpired,

    /// The stored access token lacks scopes the caller asked for.
    #[error("access token is missing required scopes: {0}")]
    InsufficientScope(String),

    /// No session is present where one is required.
    #[error("not authenticated")]
    Unauthenticated,

    /// Provider discovery document could not be fetched or parsed.
    #[error("oidc discovery failed: {0}")]
    Discovery(String),

    #[cfg(feature = "http-client")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Short machine-readable code, suitable for an `?error=` redirect parameter.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::InvalidState(_) => "invalid_state",
            Self::Authorization { .. } => "authorization_error",
            Self::TokenExchange(_) => "token_exchange_failed",
            Self::TokenRefresh(_) => "token_refresh_failed",
            Self::IdTokenValidation(_) => "id_token_invalid",
            Self::SessionDecode => "session_invalid",
            Self::SessionEncode(_) => "session_encode_failed",
            Self::AccessTokenExpired => "access_token_expired",
            Self::InsufficientScope(_) => "insufficient_scope",
            Self::Unauthenticated => "unauthenticated",
            Self::Discovery(_) => "discovery_failed",
            #[cfg(feature = "http-client")]
            Self::Http(_) => "http_error",
        }
    }
}
