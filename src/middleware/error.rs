use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::Error;

impl Error {
    /// HTTP status this error is reported with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated
            | Self::SessionDecode
            | Self::AccessTokenExpired
            | Self::TokenRefresh(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope(_) => StatusCode::FORBIDDEN,
            Self::InvalidState(_) | Self::Authorization { .. } | Self::IdTokenValidation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::TokenExchange(_) | Self::Discovery(_) => StatusCode::BAD_GATEWAY,
            #[cfg(feature = "http-client")]
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::SessionEncode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Auth internal error");
            let body = if status == StatusCode::BAD_GATEWAY {
                "Identity provider error"
            } else {
                "Internal error"
            };
            return (status, body).into_response();
        }
        (status, self.to_string()).into_response()
    }
}
