//! Router-level tests.
//!
//! - **api_tests**: public routes, authentication gate, CSRF flow, logout
//! - **limits_tests**: rate limiting behind the client IP resolver, body size guard
//! - **recovery_tests**: panic isolation
//! - **config_tests**: configuration layering and validation

mod config_tests;
mod recovery_tests;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, Response},
};
use http_body_util::BodyExt;
use serde_json::Value;

use crate::config::AppConfig;
use crate::session::{InMemorySessionService, Role, User};
use crate::state::AppState;

pub(crate) struct TestApp {
    pub state: AppState,
    pub sessions: Arc<InMemorySessionService>,
}

impl TestApp {
    pub async fn new(config: AppConfig) -> Self {
        let sessions = Arc::new(InMemorySessionService::from_config(&config.session));
        let state = AppState::new(config, sessions.clone());
        Self { state, sessions }
    }

    /// Registers a user and opens a session for it; returns the cookie token.
    pub async fn login(&self, email: &str) -> (User, String) {
        let user = User::new(email, Role::Student);
        self.sessions.insert_user(user.clone()).await;
        let (token, _) = self.sessions.create_session(user.id).await.unwrap();
        (user, token)
    }
}

pub(crate) fn get_request(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(uri)
}

pub(crate) fn post_request(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("POST").uri(uri)
}

pub(crate) fn session_cookie(token: &str) -> (header::HeaderName, String) {
    (header::COOKIE, format!("session={token}"))
}

/// Attaches a transport peer address, as `into_make_service_with_connect_info` would.
pub(crate) fn from_peer(mut req: Request<Body>, peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

pub(crate) async fn body_json(res: Response<Body>) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Token value of the `session` cookie set by a response, if any.
pub(crate) fn set_session_cookie(res: &Response<Body>) -> Option<String> {
    res.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.strip_prefix("session="))
        .map(|v| v.split(';').next().unwrap_or_default().to_string())
}
