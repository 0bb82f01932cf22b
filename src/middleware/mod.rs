//! Plug-and-play login routes and session extraction for Axum.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use authok_session::{AuthFlow, Config, HttpOidcClient};
//! use authok_session::middleware::{AuthSession, auth_routes, rolling_session};
//!
//! // 1. Resolve configuration once, at startup
//! let config = Config::from_env()?;
//! let client = HttpOidcClient::new(&config)?;
//! let flow = AuthFlow::new(config, client)?;
//!
//! // 2. Mount /api/auth/{login,callback,logout,me}
//! let app = axum::Router::new()
//!     .route("/private", axum::routing::get(private))
//!     .with_state(flow.sessions().clone())
//!     .merge(auth_routes(flow.clone()))
//!     // 3. Slide the rolling window on every authenticated request
//!     .layer(axum::middleware::from_fn_with_state(flow, rolling_session));
//!
//! async fn private(AuthSession(session): AuthSession) -> String {
//!     format!("hello {}", session.subject().unwrap_or("anonymous"))
//! }
//! ```

mod error;
mod extractor;
mod routes;
mod state;
mod traits;

pub use extractor::AuthSession;
pub use routes::{auth_routes, auth_routes_with_hooks, rolling_session};
pub use traits::AuthHooks;
