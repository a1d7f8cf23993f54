//! # Tutorgate
//!
//! Security middleware core of the tutoring platform backend.
//!
//! ## Architecture
//!
//! The service is built using:
//! - **Axum**: HTTP server, routing and `from_fn` middleware
//! - **Tokio**: async runtime and background cleanup tasks
//! - **Governor**: token-bucket rate limiting
//!
//! ## Core Components
//!
//! - [`config`]: layered configuration (embedded defaults, files, environment)
//! - [`crypto`]: random tokens and constant-time comparison
//! - [`error`]: error taxonomy and JSON error responses
//! - [`middleware`]: panic recovery, body size guard, client IP resolution,
//!   rate limiting, session authentication and CSRF protection
//! - [`routes`]: HTTP endpoints and middleware wiring
//! - [`session`]: contract with the session store, plus an in-memory implementation
//! - [`state`]: shared application state
//! - [`sweeper`]: cancellable periodic background jobs

pub mod config;
pub mod crypto;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod session;
pub mod state;
pub mod sweeper;

#[cfg(test)]
mod tests;
