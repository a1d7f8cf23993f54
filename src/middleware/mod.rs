//! Security middleware.
//!
//! Layered outermost first: panic recovery, body size guard, client IP
//! resolution, rate limiting, session authentication and the CSRF check.
//! Each piece is a plain `axum::middleware::from_fn(_with_state)` function so
//! routes can pick the subset they need.

pub mod auth;
pub mod body_limit;
pub mod cookie;
pub mod csrf;
pub mod ip;
pub mod rate_limit;
pub mod recovery;

pub use auth::{AuthContext, AuthGate, OptionalAuth, RequireAuth};
pub use csrf::CsrfStore;
pub use ip::{ClientIp, TrustedProxies};
pub use rate_limit::LimiterRegistry;
