use std::future::Future;

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::error::Error;
use crate::flow::LoginOptions;
use crate::session::Session;

/// Application hooks around the login callback.
///
/// Every method has a default, so `()` works when nothing needs customizing.
///
/// # Example
///
/// ```rust,ignore
/// struct Hooks;
///
/// impl AuthHooks for Hooks {
///     async fn after_callback(
///         &self,
///         mut session: Session,
///         _custom_state: Option<&Value>,
///     ) -> Result<Session, Error> {
///         session.claims.remove("picture");
///         Ok(session)
///     }
///
///     fn on_error(&self, error: Error) -> Response {
///         Redirect::to(&format!("/login-failed?error={}", error.code())).into_response()
///     }
/// }
/// ```
pub trait AuthHooks: Send + Sync + 'static {
    /// Application state to carry through the login, stored in the transient
    /// cookie and handed back to [`after_callback`](Self::after_callback).
    fn login_state(&self, headers: &HeaderMap, options: &LoginOptions) -> Option<Value> {
        let _ = (headers, options);
        None
    }

    /// Inspect or amend the new session before it is written. Returning an
    /// error aborts the login; no session cookie is set.
    ///
    /// `custom_state` is what [`login_state`](Self::login_state) returned.
    fn after_callback(
        &self,
        session: Session,
        custom_state: Option<&Value>,
    ) -> impl Future<Output = Result<Session, Error>> + Send {
        let _ = custom_state;
        std::future::ready(Ok(session))
    }

    /// Response for a failed login, logout or callback.
    fn on_error(&self, error: Error) -> Response {
        error.into_response()
    }
}

impl AuthHooks for () {}
