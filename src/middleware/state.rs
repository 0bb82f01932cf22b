use std::sync::Arc;

use axum::extract::FromRef;

use super::traits::AuthHooks;
use crate::flow::AuthFlow;
use crate::oidc::OidcClient;
use crate::session::SessionStore;

/// Shared state for auth route handlers.
pub(super) struct AuthState<C, H> {
    pub(super) flow: AuthFlow<C>,
    pub(super) hooks: Arc<H>,
}

// Manual Clone: avoid derive adding `C: Clone, H: Clone` bounds.
impl<C, H> Clone for AuthState<C, H> {
    fn clone(&self) -> Self {
        Self {
            flow: self.flow.clone(),
            hooks: Arc::clone(&self.hooks),
        }
    }
}

// AuthSession reads the session through whatever state it runs under
impl<C: OidcClient, H: AuthHooks> FromRef<AuthState<C, H>> for SessionStore {
    fn from_ref(state: &AuthState<C, H>) -> Self {
        state.flow.sessions().clone()
    }
}

impl<C: OidcClient> FromRef<AuthFlow<C>> for SessionStore {
    fn from_ref(flow: &AuthFlow<C>) -> Self {
        flow.sessions().clone()
    }
}
