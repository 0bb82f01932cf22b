use axum::extract::{FromRef, FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;

use crate::error::Error;
use crate::session::{Session, SessionStore};

/// Session of the authenticated user, decoded from the session cookie.
///
/// Use as an Axum extractor in route handlers. Returns `401 Unauthorized`
/// if no valid session exists. Works under any router state that a
/// [`SessionStore`] can be taken from.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected(AuthSession(session): AuthSession) -> impl IntoResponse {
///     format!("Hello, {}", session.subject().unwrap_or_default())
/// }
///
/// // Optional: accessible to both authenticated and anonymous users
/// async fn public(session: Option<AuthSession>) -> impl IntoResponse {
///     match session {
///         Some(AuthSession(s)) => format!("Hello, {}", s.subject().unwrap_or_default()),
///         None => "Hello, guest".to_string(),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthSession(pub Session);

fn session_from_parts<S>(parts: &Parts, state: &S) -> Option<Session>
where
    SessionStore: FromRef<S>,
{
    let jar = CookieJar::from_headers(&parts.headers);
    SessionStore::from_ref(state).get(&jar)
}

impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
    SessionStore: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        session_from_parts(parts, state)
            .map(AuthSession)
            .ok_or(Error::Unauthenticated)
    }
}

impl<S> OptionalFromRequestParts<S> for AuthSession
where
    S: Send + Sync,
    SessionStore: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(session_from_parts(parts, state).map(AuthSession))
    }
}
