//! In-memory [`SessionService`] used by the development binary and the test suite.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Session, SessionError, SessionService, User, ValidatedSession};
use crate::config::SessionConfig;
use crate::crypto::random_token;

/// How long a rotated-out token keeps working, so concurrent requests that
/// still carry it are not logged out by a sibling's renewal.
const ROTATION_GRACE_SECONDS: u64 = 30;

const MAX_SECONDS: u64 = 10 * 365 * 24 * 3600;

#[derive(Debug, Clone)]
struct TokenRecord {
    session_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Session>,
    tokens: HashMap<String, TokenRecord>,
}

pub struct InMemorySessionService {
    state: RwLock<MemoryState>,
    lifetime: TimeDelta,
    refresh_buffer: TimeDelta,
}

fn seconds(secs: u64) -> TimeDelta {
    // clamped, cannot overflow i64
    TimeDelta::seconds(secs.min(MAX_SECONDS) as i64)
}

impl InMemorySessionService {
    pub fn new(lifetime_seconds: u64, refresh_buffer_seconds: u64) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            lifetime: seconds(lifetime_seconds),
            refresh_buffer: seconds(refresh_buffer_seconds),
        }
    }

    pub fn from_config(cfg: &SessionConfig) -> Self {
        Self::new(cfg.lifetime_seconds, cfg.refresh_buffer_seconds)
    }

    pub async fn insert_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }

    /// Sets the soft-delete marker. Returns `false` for unknown users.
    pub async fn soft_delete_user(&self, user_id: Uuid) -> bool {
        match self.state.write().await.users.get_mut(&user_id) {
            Some(user) => {
                user.deleted_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Opens a session for an existing user and returns its cookie token.
    pub async fn create_session(&self, user_id: Uuid) -> Result<(String, Session), SessionError> {
        let token = random_token().map_err(|e| SessionError::Backend(e.to_string()))?;
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user_id) {
            return Err(SessionError::UserNotFound);
        }
        let session = Session { id: Uuid::new_v4(), user_id, expires_at: Utc::now() + self.lifetime };
        state.sessions.insert(session.id, session.clone());
        state
            .tokens
            .insert(token.clone(), TokenRecord { session_id: session.id, expires_at: session.expires_at });
        Ok((token, session))
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn validate_session_with_buffer(&self, token: &str) -> Result<ValidatedSession, SessionError> {
        let state = self.state.read().await;
        let now = Utc::now();
        let record = state.tokens.get(token).ok_or(SessionError::NotFound)?;
        if record.expires_at <= now {
            return Err(SessionError::Expired);
        }
        let session = state.sessions.get(&record.session_id).ok_or(SessionError::NotFound)?;
        if session.expires_at <= now {
            return Err(SessionError::Expired);
        }
        Ok(ValidatedSession {
            session: session.clone(),
            refresh_due: session.expires_at - now <= self.refresh_buffer,
        })
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> Result<User, SessionError> {
        self.state.read().await.users.get(&user_id).cloned().ok_or(SessionError::UserNotFound)
    }

    async fn refresh_session_token(&self, old_token: &str) -> Result<String, SessionError> {
        let new_token = random_token().map_err(|e| SessionError::Backend(e.to_string()))?;
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = Utc::now();

        let record = state.tokens.get(old_token).cloned().ok_or(SessionError::NotFound)?;
        if record.expires_at <= now {
            return Err(SessionError::Expired);
        }
        let session = state.sessions.get_mut(&record.session_id).ok_or(SessionError::NotFound)?;
        if session.expires_at <= now {
            return Err(SessionError::Expired);
        }
        session.expires_at = now + self.lifetime;
        let expires_at = session.expires_at;

        state.tokens.retain(|_, r| r.expires_at > now);
        if let Some(old) = state.tokens.get_mut(old_token) {
            old.expires_at = old.expires_at.min(now + seconds(ROTATION_GRACE_SECONDS));
        }
        state
            .tokens
            .insert(new_token.clone(), TokenRecord { session_id: record.session_id, expires_at });
        Ok(new_token)
    }

    async fn revoke_session(&self, session_id: Uuid) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        state.sessions.remove(&session_id);
        state.tokens.retain(|_, r| r.session_id != session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    async fn service_with_user(refresh_buffer: u64) -> (InMemorySessionService, User) {
        let service = InMemorySessionService::new(3600, refresh_buffer);
        let user = User::new("student@example.com", Role::Student);
        service.insert_user(user.clone()).await;
        (service, user)
    }

    #[tokio::test]
    async fn created_session_validates() {
        let (service, user) = service_with_user(60).await;
        let (token, session) = service.create_session(user.id).await.unwrap();
        let validated = service.validate_session_with_buffer(&token).await.unwrap();
        assert_eq!(validated.session.id, session.id);
        assert_eq!(validated.session.user_id, user.id);
        assert!(!validated.refresh_due);
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let (service, _) = service_with_user(60).await;
        assert!(matches!(
            service.validate_session_with_buffer("nope").await,
            Err(SessionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn session_inside_buffer_is_flagged() {
        let (service, user) = service_with_user(7200).await;
        let (token, _) = service.create_session(user.id).await.unwrap();
        assert!(service.validate_session_with_buffer(&token).await.unwrap().refresh_due);
    }

    #[tokio::test]
    async fn refresh_keeps_session_and_old_token_during_grace() {
        let (service, user) = service_with_user(7200).await;
        let (old, session) = service.create_session(user.id).await.unwrap();
        let new = service.refresh_session_token(&old).await.unwrap();
        assert_ne!(old, new);

        let via_new = service.validate_session_with_buffer(&new).await.unwrap();
        let via_old = service.validate_session_with_buffer(&old).await.unwrap();
        assert_eq!(via_new.session.id, session.id);
        assert_eq!(via_old.session.id, session.id);
    }

    #[tokio::test]
    async fn revoke_invalidates_all_tokens() {
        let (service, user) = service_with_user(7200).await;
        let (old, session) = service.create_session(user.id).await.unwrap();
        let new = service.refresh_session_token(&old).await.unwrap();
        service.revoke_session(session.id).await.unwrap();
        assert!(service.validate_session_with_buffer(&old).await.is_err());
        assert!(service.validate_session_with_buffer(&new).await.is_err());
    }

    #[tokio::test]
    async fn soft_delete_keeps_user_visible_but_marked() {
        let (service, user) = service_with_user(60).await;
        assert!(service.soft_delete_user(user.id).await);
        assert!(service.get_user_by_id(user.id).await.unwrap().is_deleted());
        assert!(!service.soft_delete_user(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn session_for_unknown_user_fails() {
        let service = InMemorySessionService::new(3600, 60);
        assert!(matches!(
            service.create_session(Uuid::new_v4()).await,
            Err(SessionError::UserNotFound)
        ));
    }
}
