use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::header::{CACHE_CONTROL, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use super::state::AuthState;
use super::traits::AuthHooks;
use crate::error::Error;
use crate::flow::{AuthFlow, CallbackParams, LoginOptions, LogoutOptions};
use crate::oidc::OidcClient;

/// Create the login, callback, logout and profile routes at the paths
/// configured in [`Routes`](crate::config::Routes).
pub fn auth_routes<C: OidcClient>(flow: AuthFlow<C>) -> Router {
    auth_routes_with_hooks(flow, ())
}

/// [`auth_routes`] with application hooks around the callback.
pub fn auth_routes_with_hooks<C, H>(flow: AuthFlow<C>, hooks: H) -> Router
where
    C: OidcClient,
    H: AuthHooks,
{
    let routes = flow.config().routes().clone();
    let state = AuthState {
        flow,
        hooks: Arc::new(hooks),
    };

    Router::new()
        .route(&routes.login, get(login::<C, H>))
        .route(
            &routes.callback,
            get(callback_query::<C, H>).post(callback_form::<C, H>),
        )
        .route(&routes.logout, get(logout::<C, H>))
        .route(&routes.profile, get(profile::<C, H>))
        .with_state(state)
}

// ── Login ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginQuery {
    #[serde(rename = "returnTo")]
    return_to: Option<String>,
    organization: Option<String>,
    #[serde(flatten)]
    authorization_params: BTreeMap<String, String>,
}

async fn login<C: OidcClient, H: AuthHooks>(
    State(state): State<AuthState<C, H>>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> Result<(CookieJar, Response), Response> {
    let mut options = LoginOptions {
        return_to: query.return_to.and_then(|r| guard_return_to(&state.flow, &r)),
        authorization_params: query.authorization_params,
        organization: query.organization,
        custom_state: None,
    };
    options.custom_state = state.hooks.login_state(&headers, &options);

    let (jar, url) = state.flow.login(jar, options).await.map_err(|e| {
        tracing::error!(error = %e, "Login failed");
        state.hooks.on_error(e)
    })?;
    Ok((jar, found(url.as_str())))
}

// ── Callback ───────────────────────────────────────────────────────

async fn callback_query<C: OidcClient, H: AuthHooks>(
    State(state): State<AuthState<C, H>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    finish_callback(&state, jar, params).await
}

/// `response_mode=form_post`: the provider POSTs the response cross-site.
async fn callback_form<C: OidcClient, H: AuthHooks>(
    State(state): State<AuthState<C, H>>,
    jar: CookieJar,
    Form(params): Form<CallbackParams>,
) -> Response {
    finish_callback(&state, jar, params).await
}

async fn finish_callback<C: OidcClient, H: AuthHooks>(
    state: &AuthState<C, H>,
    jar: CookieJar,
    params: CallbackParams,
) -> Response {
    let (jar, outcome) = state.flow.handle_callback(jar, params).await;
    let mut outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => return (jar, state.hooks.on_error(e)).into_response(),
    };

    outcome.session = match state
        .hooks
        .after_callback(outcome.session, outcome.custom_state.as_ref())
        .await
    {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "Login rejected by application");
            return (jar, state.hooks.on_error(e)).into_response();
        }
    };

    match state.flow.establish(jar.clone(), &mut outcome) {
        Ok(jar) => (jar, found(&outcome.return_to)).into_response(),
        Err(e) => (jar, state.hooks.on_error(e)).into_response(),
    }
}

// ── Logout ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LogoutQuery {
    #[serde(rename = "returnTo")]
    return_to: Option<String>,
}

async fn logout<C: OidcClient, H: AuthHooks>(
    State(state): State<AuthState<C, H>>,
    jar: CookieJar,
    Query(query): Query<LogoutQuery>,
) -> Result<(CookieJar, Response), Response> {
    let options = LogoutOptions {
        return_to: query.return_to.and_then(|r| guard_return_to(&state.flow, &r)),
        logout_params: Vec::new(),
    };
    let (jar, url) = state.flow.logout(jar, options).await.map_err(|e| {
        tracing::error!(error = %e, "Logout failed");
        state.hooks.on_error(e)
    })?;
    Ok((jar, found(url.as_str())))
}

// ── Profile ────────────────────────────────────────────────────────

async fn profile<C: OidcClient, H: AuthHooks>(
    State(state): State<AuthState<C, H>>,
    jar: CookieJar,
) -> Result<Response, Error> {
    let session = state.flow.get_session(&jar).ok_or(Error::Unauthenticated)?;
    let mut response = Json(session.claims).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

// ── Rolling session ────────────────────────────────────────────────

/// Middleware re-writing the session cookie after each request, so the
/// rolling window starts again from now.
///
/// Skipped when rolling is off, when the request has no session, and when
/// the handler already wrote the session cookie itself (login, logout).
///
/// ```rust,ignore
/// app.layer(axum::middleware::from_fn_with_state(flow, rolling_session));
/// ```
pub async fn rolling_session<C: OidcClient>(
    State(flow): State<AuthFlow<C>>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if !flow.config().session().rolling || writes_session(&response, flow.sessions().cookie_name()) {
        return response;
    }
    match flow.touch_session(jar) {
        Ok(jar) => (jar, response).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to extend session");
            response
        }
    }
}

fn writes_session(response: &Response, name: &str) -> bool {
    let prefix = format!("{name}=");
    let chunk_prefix = format!("{name}.");
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.starts_with(&prefix) || v.starts_with(&chunk_prefix))
}

// ── Helpers ────────────────────────────────────────────────────────

/// `302 Found` to `location`.
fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(_) => Error::Config(format!("redirect target is not a valid header: {location}"))
            .into_response(),
    }
}

fn guard_return_to<C: OidcClient>(flow: &AuthFlow<C>, candidate: &str) -> Option<String> {
    let safe = flow.safe_return_to(candidate);
    if safe.is_none() {
        tracing::warn!(return_to = %candidate, "Ignoring off-site returnTo");
    }
    safe
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use axum::http::header::{CONTENT_TYPE, COOKIE};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use url::Url;

    use super::*;
    use crate::middleware::AuthSession;
    use crate::session::Session;
    use crate::testing::{self, FakeProvider, ISSUER, query_param};

    fn flow() -> AuthFlow<FakeProvider> {
        AuthFlow::new(testing::config(), FakeProvider::new()).unwrap()
    }

    fn request(uri: &str, cookies: &str) -> Request<Body> {
        let mut builder = Request::get(uri);
        if !cookies.is_empty() {
            builder = builder.header(COOKIE, cookies);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn location(response: &Response) -> String {
        response.headers()[LOCATION].to_str().unwrap().to_string()
    }

    /// Non-empty `Set-Cookie` values of `response`, as a `Cookie` header.
    fn cookies_of(response: &Response) -> String {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .filter(|pair| !pair.ends_with('='))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Whether `response` sets a non-empty cookie named `name`.
    fn sets_cookie(response: &Response, name: &str) -> bool {
        cookies_of(response)
            .split("; ")
            .any(|pair| pair.split_once('=').is_some_and(|(n, _)| n == name))
    }

    /// Whether `response` expires the cookie named `name`.
    fn clears_cookie(response: &Response, name: &str) -> bool {
        let prefix = format!("{name}=;");
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .any(|v| v.to_str().unwrap().starts_with(&prefix))
    }

    fn id_claims(nonce: &str) -> Value {
        json!({ "sub": "user|1", "name": "Ann", "nonce": nonce, "iss": format!("{ISSUER}/") })
    }

    /// Run login and callback; returns the callback response.
    async fn sign_in(app: &Router, flow: &AuthFlow<FakeProvider>, login_uri: &str) -> Response {
        let response = app.clone().oneshot(request(login_uri, "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        let authorize = Url::parse(&location(&response)).unwrap();
        let state = query_param(&authorize, "state").unwrap();
        let nonce = query_param(&authorize, "nonce").unwrap();
        flow.client().set_claims(id_claims(&nonce));

        let uri = format!("/api/auth/callback?code=code-1&state={state}");
        app.clone()
            .oneshot(request(&uri, &cookies_of(&response)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn login_redirects_to_provider() {
        let app = auth_routes(flow());
        let response = app.oneshot(request("/api/auth/login", "")).await.unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response).starts_with("https://op.example.com/authorize?"));
        let authorize = Url::parse(&location(&response)).unwrap();
        let state = query_param(&authorize, "state").unwrap();
        assert!(sets_cookie(&response, &format!("auth_verification.{state}")));
    }

    #[tokio::test]
    async fn full_login_then_profile() {
        let flow = flow();
        let app = auth_routes(flow.clone());
        let callback = sign_in(&app, &flow, "/api/auth/login?returnTo=/dashboard").await;

        assert_eq!(callback.status(), StatusCode::FOUND);
        assert_eq!(location(&callback), "https://example.org/dashboard");
        assert!(sets_cookie(&callback, "appSession"));
        let session_cookies = cookies_of(&callback);

        let me = app
            .oneshot(request("/api/auth/me", &session_cookies))
            .await
            .unwrap();
        assert_eq!(me.status(), StatusCode::OK);
        assert_eq!(me.headers()[CACHE_CONTROL], "no-store");
        let body = to_bytes(me.into_body(), usize::MAX).await.unwrap();
        let claims: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(claims, json!({ "sub": "user|1", "name": "Ann" }));
    }

    #[tokio::test]
    async fn off_site_return_to_is_ignored() {
        let flow = flow();
        let app = auth_routes(flow.clone());
        let callback = sign_in(
            &app,
            &flow,
            "/api/auth/login?returnTo=https%3A%2F%2Fevil.example%2Fsteal",
        )
        .await;
        assert_eq!(location(&callback), "https://example.org/");
    }

    #[tokio::test]
    async fn profile_requires_session() {
        let app = auth_routes(flow());
        let response = app.oneshot(request("/api/auth/me", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn callback_without_login_is_bad_request() {
        let app = auth_routes(flow());
        let response = app
            .oneshot(request("/api/auth/callback?code=c&state=unknown", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        // the (absent) transient cookie is still expired
        assert!(clears_cookie(&response, "auth_verification.unknown"));
    }

    #[tokio::test]
    async fn form_post_callback_is_accepted() {
        let flow = flow();
        let app = auth_routes(flow.clone());
        let login = app.clone().oneshot(request("/api/auth/login", "")).await.unwrap();
        let authorize = Url::parse(&location(&login)).unwrap();
        let state = query_param(&authorize, "state").unwrap();
        flow.client()
            .set_claims(id_claims(&query_param(&authorize, "nonce").unwrap()));

        let request = Request::post("/api/auth/callback")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(COOKIE, cookies_of(&login))
            .body(Body::from(format!("code=code-1&state={state}")))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(sets_cookie(&response, "appSession"));
    }

    #[tokio::test]
    async fn logout_clears_session_and_redirects_to_provider() {
        let flow = flow();
        let app = auth_routes(flow.clone());
        let callback = sign_in(&app, &flow, "/api/auth/login").await;

        let response = app
            .oneshot(request("/api/auth/logout", &cookies_of(&callback)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response).starts_with("https://op.example.com/session/end?"));
        assert!(clears_cookie(&response, "appSession"));
    }

    struct RejectingHooks;

    impl AuthHooks for RejectingHooks {
        async fn after_callback(
            &self,
            _session: Session,
            _custom_state: Option<&Value>,
        ) -> Result<Session, Error> {
            Err(Error::Unauthenticated)
        }

        fn on_error(&self, error: Error) -> Response {
            found(&format!("/login-failed?error={}", error.code()))
        }
    }

    /// Carries the `X-Cart` request header through the login.
    #[derive(Default)]
    struct CartHooks {
        seen: Arc<std::sync::Mutex<Option<Value>>>,
    }

    impl AuthHooks for CartHooks {
        fn login_state(&self, headers: &HeaderMap, options: &LoginOptions) -> Option<Value> {
            let cart = headers.get("x-cart")?.to_str().ok()?;
            Some(json!({ "cart": cart, "return_to": options.return_to }))
        }

        async fn after_callback(
            &self,
            session: Session,
            custom_state: Option<&Value>,
        ) -> Result<Session, Error> {
            *self.seen.lock().unwrap() = custom_state.cloned();
            Ok(session)
        }
    }

    #[tokio::test]
    async fn login_state_reaches_after_callback() {
        let flow = flow();
        let hooks = CartHooks::default();
        let seen = Arc::clone(&hooks.seen);
        let app = auth_routes_with_hooks(flow.clone(), hooks);

        let login = Request::get("/api/auth/login?returnTo=/checkout")
            .header("x-cart", "c-42")
            .body(Body::empty())
            .unwrap();
        let login = app.clone().oneshot(login).await.unwrap();
        let authorize = Url::parse(&location(&login)).unwrap();
        let state = query_param(&authorize, "state").unwrap();
        flow.client()
            .set_claims(id_claims(&query_param(&authorize, "nonce").unwrap()));

        let uri = format!("/api/auth/callback?code=code-1&state={state}");
        let callback = app.oneshot(request(&uri, &cookies_of(&login))).await.unwrap();
        assert_eq!(callback.status(), StatusCode::FOUND);
        assert_eq!(
            *seen.lock().unwrap(),
            Some(json!({ "cart": "c-42", "return_to": "https://example.org/checkout" }))
        );
    }

    #[tokio::test]
    async fn hooks_can_reject_login() {
        let flow = flow();
        let app = auth_routes_with_hooks(flow.clone(), RejectingHooks);
        let callback = sign_in(&app, &flow, "/api/auth/login").await;

        assert_eq!(location(&callback), "/login-failed?error=unauthenticated");
        assert!(!sets_cookie(&callback, "appSession"));
    }

    #[tokio::test]
    async fn rolling_layer_extends_authenticated_requests() {
        let flow = flow();
        let auth = auth_routes(flow.clone());
        let callback = sign_in(&auth, &flow, "/api/auth/login").await;
        let cookies = cookies_of(&callback);

        let app = Router::new()
            .route(
                "/private",
                get(|AuthSession(session): AuthSession| async move {
                    session.subject().unwrap_or_default().to_string()
                }),
            )
            .route(
                "/public",
                get(|session: Option<AuthSession>| async move { session.is_some().to_string() }),
            )
            .with_state(flow.clone())
            .layer(axum::middleware::from_fn_with_state(
                flow,
                rolling_session::<FakeProvider>,
            ));

        let private = app.clone().oneshot(request("/private", &cookies)).await.unwrap();
        assert_eq!(private.status(), StatusCode::OK);
        assert!(sets_cookie(&private, "appSession"));

        let anonymous = app.clone().oneshot(request("/private", "")).await.unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
        assert!(anonymous.headers().get(SET_COOKIE).is_none());

        let public = app.oneshot(request("/public", "")).await.unwrap();
        let body = to_bytes(public.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"false");
    }
}
