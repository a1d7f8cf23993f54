//! HTTP surface and middleware wiring.
//!
//! - `health`: liveness and build info
//! - `auth`: identity, CSRF token issuance and logout

pub mod auth;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::middleware::{
    auth::{optional_auth, require_auth},
    body_limit::{limit_body, BodyLimit, RouteClass},
    csrf::csrf_middleware,
    ip::client_ip_middleware,
    rate_limit::rate_limit_by_ip,
    recovery::recover_panics,
};
use crate::state::AppState;

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/version", get(health::version));

    let identity = Router::new()
        .route("/api/me", get(auth::me))
        .route_layer(from_fn_with_state(state.auth.clone(), optional_auth));

    let session = Router::new()
        .route("/api/csrf-token", get(auth::csrf_token))
        .route_layer(from_fn_with_state(state.csrf.clone(), csrf_middleware))
        .route_layer(from_fn_with_state(state.auth.clone(), require_auth));

    // Layers run bottom-up: login limiter, then session, then CSRF.
    let account = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route_layer(from_fn_with_state(state.csrf.clone(), csrf_middleware))
        .route_layer(from_fn_with_state(state.auth.clone(), require_auth))
        .route_layer(from_fn_with_state(state.limiters.login.clone(), rate_limit_by_ip));

    let app = Router::new()
        .merge(public)
        .merge(identity)
        .merge(session)
        .merge(account)
        .with_state(state.clone());

    with_security_layers(app, &state)
}

/// Wraps a router in the request-wide layers.
///
/// Order from the outside in: panic recovery, tracing, body size guard,
/// client IP resolution.
pub fn with_security_layers(app: Router, state: &AppState) -> Router {
    let json_limit = state.body_limits.for_class(RouteClass::Json);
    app.layer(from_fn_with_state(state.proxies.clone(), client_ip_middleware))
        .layer(from_fn_with_state(BodyLimit(json_limit), limit_body))
        // axum's own extractor ceiling must not undercut the configured limits
        .layer(DefaultBodyLimit::max(state.body_limits.upload.max(json_limit)))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(recover_panics))
}
