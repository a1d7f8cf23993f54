use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::crypto::EntropyError;
use crate::session::SessionError;

/// The primary error type for the security layer.
///
/// Every variant renders as a JSON body `{"error": <message>, "code": <status>}`.
/// Variants a client is expected to react to programmatically also carry a stable
/// `error_code` string.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing, invalid or expired session, unknown or deleted user.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// A state-changing request arrived without an authenticated session to bind a CSRF token to.
    #[error("CSRF validation requires an authenticated session")]
    CsrfSessionMissing,
    /// A state-changing request arrived without an `X-CSRF-Token` header.
    #[error("CSRF token missing")]
    CsrfTokenMissing,
    /// The `X-CSRF-Token` header did not match a live token of the session.
    #[error("CSRF token invalid")]
    CsrfTokenInvalid,
    /// The caller exhausted its token bucket.
    #[error("Rate limited. Retry after {retry_after_seconds} seconds")]
    RateLimited {
        /// Seconds until the next token becomes available.
        retry_after_seconds: u64,
    },
    /// The request body exceeded the ceiling of its route class.
    #[error("Request body too large")]
    PayloadTooLarge,
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// For internal server errors that are not expected to be handled by the client.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// A type alias for `Result<T, AppError>`, used throughout the crate.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) | AppError::CsrfSessionMissing => StatusCode::UNAUTHORIZED,
            AppError::CsrfTokenMissing | AppError::CsrfTokenInvalid => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable key, where one exists.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            AppError::CsrfSessionMissing => Some("CSRF_SESSION_MISSING"),
            AppError::CsrfTokenMissing => Some("CSRF_TOKEN_MISSING"),
            AppError::CsrfTokenInvalid => Some("CSRF_TOKEN_INVALID"),
            AppError::RateLimited { .. } => Some("RATE_LIMITED"),
            AppError::PayloadTooLarge => Some("PAYLOAD_TOO_LARGE"),
            AppError::Unauthorized(_) | AppError::BadRequest(_) | AppError::Internal(_) => None,
        }
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Unauthorized(msg) => msg.clone(),
            AppError::CsrfSessionMissing => "Missing session for CSRF validation".to_string(),
            AppError::CsrfTokenMissing => "CSRF token missing".to_string(),
            AppError::CsrfTokenInvalid => "Invalid CSRF token".to_string(),
            AppError::RateLimited { retry_after_seconds } => format!(
                "Rate limit exceeded. Please try again in {} seconds",
                retry_after_seconds
            ),
            AppError::PayloadTooLarge => {
                "Request body too large. Please reduce the payload size and try again".to_string()
            }
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Internal(_) => INTERNAL_MESSAGE.to_string(),
        }
    }
}

const INTERNAL_MESSAGE: &str = "Internal server error";

/// The opaque 500 response. Never carries internal detail.
pub fn internal_server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": INTERNAL_MESSAGE, "code": 500 })),
    )
        .into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(e) = &self {
            let error_id = uuid::Uuid::new_v4();
            tracing::error!(%error_id, "Internal error: {:?}", e);
            return internal_server_error();
        }

        let status = self.status();
        let mut body = json!({
            "error": self.client_message(),
            "code": status.as_u16(),
        });
        if let Some(code) = self.error_code() {
            body["error_code"] = json!(code);
        }

        let retry_after = match &self {
            AppError::RateLimited { retry_after_seconds } => {
                body["retry_after_seconds"] = json!(retry_after_seconds);
                Some(*retry_after_seconds)
            }
            _ => None,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<EntropyError> for AppError {
    fn from(err: EntropyError) -> Self {
        AppError::Internal(anyhow::Error::new(err))
    }
}

impl From<crate::middleware::csrf::CsrfError> for AppError {
    fn from(err: crate::middleware::csrf::CsrfError) -> Self {
        AppError::Internal(anyhow::Error::new(err))
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Backend(_) => AppError::Internal(anyhow::Error::new(err)),
            _ => AppError::Unauthorized("Invalid or expired session".to_string()),
        }
    }
}
