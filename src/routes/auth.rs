use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::cookie::clear_session_cookie;
use crate::middleware::{OptionalAuth, RequireAuth};
use crate::session::{Role, User};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self { id: user.id, email: user.email.clone(), role: user.role }
    }
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserView>,
}

#[derive(Debug, Serialize)]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
}

/// Current identity; anonymous callers get `authenticated: false`.
pub async fn me(OptionalAuth(ctx): OptionalAuth) -> Json<MeResponse> {
    let user = ctx.as_ref().map(|c| UserView::from(&c.user));
    Json(MeResponse { authenticated: user.is_some(), user })
}

/// Issues a CSRF token bound to the caller's session.
pub async fn csrf_token(State(state): State<AppState>, RequireAuth(ctx): RequireAuth) -> AppResult<Json<CsrfTokenResponse>> {
    let csrf_token = state.csrf.generate_token(&ctx.session.id.to_string())?;
    Ok(Json(CsrfTokenResponse { csrf_token }))
}

/// Ends the session: drops its CSRF tokens, revokes it and clears the cookie.
pub async fn logout(State(state): State<AppState>, RequireAuth(ctx): RequireAuth) -> AppResult<Response> {
    state.csrf.delete_token(&ctx.session.id.to_string());
    state.sessions.revoke_session(ctx.session.id).await?;
    let cookie = clear_session_cookie(state.auth.cookies()).map_err(|e| AppError::Internal(e.into()))?;
    info!(user_id = %ctx.user.id, session_id = %ctx.session.id, "User logged out");
    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)]).into_response())
}
