//! Contract with the session/user persistence layer.
//!
//! The security core never touches storage directly; it consumes a
//! [`SessionService`] and the entity types defined here.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use memory::InMemorySessionService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Tutor,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    /// Soft-delete marker. A user with this set must never authenticate.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(email: impl Into<String>, role: Role) -> Self {
        Self { id: Uuid::new_v4(), email: email.into(), role, deleted_at: None }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful session validation.
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub session: Session,
    /// The session is close enough to expiry that its token should be renewed.
    pub refresh_due: bool,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
    #[error("user not found")]
    UserNotFound,
    #[error("session backend error: {0}")]
    Backend(String),
}

/// Session and user lookups provided by the persistence layer.
///
/// Implementations may block on I/O. Callers treat every error as a single
/// failed attempt; retrying transient failures is the implementation's job.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Validates a session token and flags it when it falls inside the refresh window.
    async fn validate_session_with_buffer(&self, token: &str) -> Result<ValidatedSession, SessionError>;

    async fn get_user_by_id(&self, user_id: Uuid) -> Result<User, SessionError>;

    /// Issues a replacement token for a still-valid session.
    async fn refresh_session_token(&self, old_token: &str) -> Result<String, SessionError>;

    /// Invalidates every token of a session (logout).
    async fn revoke_session(&self, session_id: Uuid) -> Result<(), SessionError>;
}
