//! Session cookie authentication.
//!
//! [`require_auth`] and [`optional_auth`] resolve the `session` cookie into an
//! [`AuthContext`] stored in request extensions. Handlers read it through the
//! [`RequireAuth`] and [`OptionalAuth`] extractors.
//!
//! Sessions close to expiry are renewed on the fly: the new token is appended
//! as a `Set-Cookie` to whatever response the request ends up producing.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, info};

use super::cookie::{read_cookie, session_cookie, CookieSettings, SESSION_COOKIE_NAME};
use crate::error::AppError;
use crate::session::{Session, SessionService, User};

pub const MSG_AUTH_REQUIRED: &str = "Authentication required";
pub const MSG_INVALID_SESSION: &str = "Invalid or expired session";
pub const MSG_USER_NOT_FOUND: &str = "User not found";
pub const MSG_USER_DELETED: &str = "User account is deleted or deactivated";

/// Identity of an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub session: Session,
}

/// Result of one authentication attempt.
pub struct AuthOutcome {
    /// The identity, or the client-facing reason it could not be established.
    pub result: Result<AuthContext, &'static str>,
    /// Replacement session cookie, when the session was renewed.
    pub renewed_cookie: Option<HeaderValue>,
}

impl AuthOutcome {
    fn rejected(reason: &'static str) -> Self {
        Self { result: Err(reason), renewed_cookie: None }
    }
}

#[derive(Clone)]
pub struct AuthGate {
    sessions: Arc<dyn SessionService>,
    cookies: CookieSettings,
}

impl AuthGate {
    pub fn new(sessions: Arc<dyn SessionService>, cookies: CookieSettings) -> Self {
        Self { sessions, cookies }
    }

    pub fn cookies(&self) -> &CookieSettings {
        &self.cookies
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> AuthOutcome {
        let Some(token) = read_cookie(headers, SESSION_COOKIE_NAME) else {
            return AuthOutcome::rejected(MSG_AUTH_REQUIRED);
        };

        let validated = match self.sessions.validate_session_with_buffer(token).await {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Session validation failed");
                return AuthOutcome::rejected(MSG_INVALID_SESSION);
            }
        };

        let renewed_cookie = if validated.refresh_due { self.renew(token).await } else { None };

        let result = match self.sessions.get_user_by_id(validated.session.user_id).await {
            Ok(user) if user.is_deleted() => {
                info!(user_id = %user.id, "Rejected session of deleted user");
                Err(MSG_USER_DELETED)
            }
            Ok(user) => Ok(AuthContext { user, session: validated.session }),
            Err(e) => {
                debug!(user_id = %validated.session.user_id, error = %e, "Session user lookup failed");
                Err(MSG_USER_NOT_FOUND)
            }
        };

        AuthOutcome { result, renewed_cookie }
    }

    /// Best effort; the current request proceeds on the old token either way.
    async fn renew(&self, token: &str) -> Option<HeaderValue> {
        let fresh = match self.sessions.refresh_session_token(token).await {
            Ok(t) => t,
            Err(e) => {
                debug!(error = %e, "Session renewal failed");
                return None;
            }
        };
        match session_cookie(&fresh, &self.cookies) {
            Ok(cookie) => Some(cookie),
            Err(e) => {
                debug!(error = %e, "Renewed session token is not a valid header value");
                None
            }
        }
    }
}

/// Appends the renewed cookie unless the handler already set the session cookie itself (logout).
fn append_cookie(response: &mut Response, cookie: Option<HeaderValue>) {
    let Some(cookie) = cookie else {
        return;
    };
    let prefix = format!("{SESSION_COOKIE_NAME}=");
    let handler_set_session = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.starts_with(&prefix));
    if !handler_set_session {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
}

/// Rejects requests without a valid session with 401.
pub async fn require_auth(State(gate): State<AuthGate>, mut req: Request, next: Next) -> Response {
    let AuthOutcome { result, renewed_cookie } = gate.authenticate(req.headers()).await;
    let mut response = match result {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(reason) => AppError::Unauthorized(reason.to_string()).into_response(),
    };
    append_cookie(&mut response, renewed_cookie);
    response
}

/// Attaches the identity when there is one; never rejects.
pub async fn optional_auth(State(gate): State<AuthGate>, mut req: Request, next: Next) -> Response {
    let AuthOutcome { result, renewed_cookie } = gate.authenticate(req.headers()).await;
    if let Ok(ctx) = result {
        req.extensions_mut().insert(ctx);
    }
    let mut response = next.run(req).await;
    append_cookie(&mut response, renewed_cookie);
    response
}

/// Extractor for handlers behind [`require_auth`].
pub struct RequireAuth(pub AuthContext);

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(Self)
            .ok_or_else(|| AppError::Unauthorized(MSG_AUTH_REQUIRED.to_string()))
    }
}

/// Extractor for handlers behind [`optional_auth`].
pub struct OptionalAuth(pub Option<AuthContext>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<AuthContext>().cloned()))
    }
}
