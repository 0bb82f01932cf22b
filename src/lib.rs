#![doc = include_str!("../README.md")]

pub mod codec;
pub mod config;
pub(crate) mod cookies;
pub mod error;
pub mod flow;
#[cfg(feature = "http-client")]
pub mod http_client;
pub mod middleware;
pub mod oidc;
pub mod pkce;
pub mod secret;
pub mod session;
pub mod token;
pub mod transient;
pub mod types;
pub mod well_known;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use codec::CookieCodec;
pub use config::{Config, ConfigOverrides, EnvSnapshot};
pub use error::Error;
pub use flow::{AuthFlow, CallbackOutcome, CallbackParams, LoginOptions, LogoutOptions};
#[cfg(feature = "http-client")]
pub use http_client::HttpOidcClient;
pub use oidc::{CodeExchange, OidcClient, TokenSet};
pub use secret::SecretSet;
pub use session::{Session, SessionStore};
pub use token::{AccessTokenManager, AccessTokenRequest};
pub use transient::{AuthorizationState, TransientStore};
pub use types::{AccessToken, Claims};
pub use well_known::ProviderMetadata;
