//! Cross-Site Request Forgery (CSRF) protection.
//!
//! Tokens are random, bound to a session and short-lived. A session may hold
//! several live tokens at once so that multiple open tabs keep working; the
//! oldest is evicted once the per-session cap is reached.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::debug;

use super::auth::AuthContext;
use crate::config::CsrfConfig;
use crate::crypto::{constant_time_eq, random_token, EntropyError};
use crate::error::AppError;
use crate::sweeper::PeriodicTask;

pub const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Debug, Error)]
pub enum CsrfError {
    #[error("failed to generate CSRF token: {0}")]
    Entropy(#[from] EntropyError),
}

#[derive(Debug, Clone, Copy)]
pub struct CsrfSettings {
    pub token_ttl: Duration,
    pub cleanup_interval: Duration,
    pub max_tokens_per_session: usize,
}

impl Default for CsrfSettings {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
            max_tokens_per_session: 10,
        }
    }
}

impl From<&CsrfConfig> for CsrfSettings {
    fn from(cfg: &CsrfConfig) -> Self {
        Self {
            token_ttl: Duration::from_secs(cfg.token_ttl_seconds),
            cleanup_interval: Duration::from_secs(cfg.cleanup_interval_seconds),
            max_tokens_per_session: cfg.max_tokens_per_session.max(1),
        }
    }
}

#[derive(Debug, Clone)]
struct CsrfTokenEntry {
    token: String,
    expires_at: Instant,
}

impl CsrfTokenEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

type TokenMap = HashMap<String, VecDeque<CsrfTokenEntry>>;

struct StoreInner {
    settings: CsrfSettings,
    tokens: RwLock<TokenMap>,
}

impl StoreInner {
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        tokens.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| e.is_live(now));
            removed += before - entries.len();
            !entries.is_empty()
        });
        if removed > 0 {
            debug!(removed, sessions = tokens.len(), "Swept expired CSRF tokens");
        }
        removed
    }
}

/// Session-bound CSRF token store with background expiry.
///
/// Cloning shares the store.
#[derive(Clone)]
pub struct CsrfStore {
    inner: Arc<StoreInner>,
    sweeper: Arc<PeriodicTask>,
}

impl CsrfStore {
    /// Creates a store and starts its sweep task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(mut settings: CsrfSettings) -> Self {
        // a session always keeps room for the token being issued
        settings.max_tokens_per_session = settings.max_tokens_per_session.max(1);
        let inner = Arc::new(StoreInner { settings, tokens: RwLock::new(HashMap::new()) });
        let sweep_target = inner.clone();
        let sweeper = PeriodicTask::spawn("csrf", settings.cleanup_interval, move || {
            sweep_target.sweep();
        });
        Self { inner, sweeper: Arc::new(sweeper) }
    }

    /// Issues a fresh token for `session_id`.
    ///
    /// Existing live tokens of the session stay valid unless the cap forces
    /// the oldest out.
    pub fn generate_token(&self, session_id: &str) -> Result<String, CsrfError> {
        let token = random_token()?;
        let now = Instant::now();
        let settings = &self.inner.settings;

        let mut tokens = self.inner.tokens.write().unwrap_or_else(PoisonError::into_inner);
        let entries = tokens.entry(session_id.to_string()).or_default();
        entries.retain(|e| e.is_live(now));
        while entries.len() >= settings.max_tokens_per_session {
            if entries.pop_front().is_none() {
                break;
            }
        }
        entries.push_back(CsrfTokenEntry { token: token.clone(), expires_at: now + settings.token_ttl });
        Ok(token)
    }

    /// Checks `token` against every live token of the session.
    ///
    /// Each comparison is constant time and all entries are visited, so the
    /// timing reveals neither which entry matched nor how much of it.
    pub fn validate_token(&self, session_id: &str, token: &str) -> bool {
        if session_id.is_empty() || token.is_empty() {
            return false;
        }
        let now = Instant::now();
        let tokens = self.inner.tokens.read().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = tokens.get(session_id) else {
            return false;
        };
        entries
            .iter()
            .filter(|e| e.is_live(now))
            .fold(false, |found, e| found | constant_time_eq(&e.token, token))
    }

    /// Drops every token of the session. A no-op for unknown sessions.
    pub fn delete_token(&self, session_id: &str) {
        self.inner.tokens.write().unwrap_or_else(PoisonError::into_inner).remove(session_id);
    }

    /// Removes expired tokens and sessions left without any. Returns how many tokens were removed.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Number of entries held for the session, expired ones included.
    pub fn token_count(&self, session_id: &str) -> usize {
        self.inner
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map_or(0, VecDeque::len)
    }

    /// Stops the background sweep and waits for it to exit. Idempotent.
    pub async fn stop(&self) {
        self.sweeper.stop().await;
    }
}

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn header_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Verifies the `X-CSRF-Token` header of state-changing requests.
///
/// Must run after the authentication gate, which provides the session the
/// token is bound to.
pub async fn csrf_middleware(State(store): State<CsrfStore>, req: Request, next: Next) -> Response {
    if is_safe_method(req.method()) {
        return next.run(req).await;
    }

    let Some(ctx) = req.extensions().get::<AuthContext>() else {
        return AppError::CsrfSessionMissing.into_response();
    };
    let Some(token) = header_token(req.headers()) else {
        debug!(method = %req.method(), path = %req.uri().path(), "CSRF token missing");
        return AppError::CsrfTokenMissing.into_response();
    };
    if !store.validate_token(&ctx.session.id.to_string(), token) {
        debug!(method = %req.method(), path = %req.uri().path(), "CSRF token rejected");
        return AppError::CsrfTokenInvalid.into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl: Duration) -> CsrfStore {
        CsrfStore::new(CsrfSettings { token_ttl: ttl, ..CsrfSettings::default() })
    }

    #[tokio::test]
    async fn generated_token_validates_for_its_session_only() {
        let store = store(Duration::from_secs(60));
        let token = store.generate_token("session-a").unwrap();
        assert!(store.validate_token("session-a", &token));
        assert!(!store.validate_token("session-b", &token));
        assert!(!store.validate_token("session-a", "forged"));
        store.stop().await;
    }

    #[tokio::test]
    async fn empty_arguments_never_validate() {
        let store = store(Duration::from_secs(60));
        let token = store.generate_token("s").unwrap();
        assert!(!store.validate_token("", &token));
        assert!(!store.validate_token("s", ""));
        store.stop().await;
    }

    #[tokio::test]
    async fn tabs_share_a_session_and_cap_evicts_oldest() {
        let store = store(Duration::from_secs(60));
        let first = store.generate_token("s").unwrap();
        let second = store.generate_token("s").unwrap();
        assert!(store.validate_token("s", &first));
        assert!(store.validate_token("s", &second));

        let rest: Vec<String> = (0..9).map(|_| store.generate_token("s").unwrap()).collect();
        assert_eq!(store.token_count("s"), 10);
        assert!(!store.validate_token("s", &first), "oldest token must be evicted");
        assert!(store.validate_token("s", &second));
        assert!(rest.iter().all(|t| store.validate_token("s", t)));
        store.stop().await;
    }

    #[tokio::test]
    async fn expired_tokens_are_rejected_and_swept() {
        let store = store(Duration::from_millis(5));
        let token = store.generate_token("s").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!store.validate_token("s", &token));
        // validation leaves the entry for the sweep
        assert_eq!(store.token_count("s"), 1);
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.token_count("s"), 0);
        store.stop().await;
    }

    #[tokio::test]
    async fn generate_purges_expired_entries_of_the_session() {
        let store = store(Duration::from_millis(5));
        store.generate_token("s").unwrap();
        store.generate_token("s").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.generate_token("s").unwrap();
        assert_eq!(store.token_count("s"), 1);
        store.stop().await;
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = store(Duration::from_secs(60));
        let token = store.generate_token("s").unwrap();
        store.delete_token("s");
        store.delete_token("s");
        store.delete_token("never-seen");
        assert!(!store.validate_token("s", &token));
        store.stop().await;
    }

    #[tokio::test]
    async fn background_sweep_drops_empty_sessions() {
        let store = CsrfStore::new(CsrfSettings {
            token_ttl: Duration::from_millis(5),
            cleanup_interval: Duration::from_millis(20),
            max_tokens_per_session: 10,
        });
        store.generate_token("s").unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.token_count("s"), 0);
        store.stop().await;
        store.stop().await;
    }

    #[tokio::test]
    async fn zero_cap_is_treated_as_one() {
        let store = CsrfStore::new(CsrfSettings {
            token_ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
            max_tokens_per_session: 0,
        });
        let first = store.generate_token("s").unwrap();
        assert!(store.validate_token("s", &first));

        let second = store.generate_token("s").unwrap();
        assert_eq!(store.token_count("s"), 1);
        assert!(!store.validate_token("s", &first));
        assert!(store.validate_token("s", &second));
        store.stop().await;
    }

    #[test]
    fn safe_methods() {
        assert!(is_safe_method(&Method::GET));
        assert!(is_safe_method(&Method::HEAD));
        assert!(is_safe_method(&Method::OPTIONS));
        assert!(!is_safe_method(&Method::POST));
        assert!(!is_safe_method(&Method::DELETE));
    }

    #[test]
    fn blank_header_counts_as_missing() {
        let mut headers = HeaderMap::new();
        assert!(header_token(&headers).is_none());
        headers.insert(CSRF_HEADER, "  ".parse().unwrap());
        assert!(header_token(&headers).is_none());
        headers.insert(CSRF_HEADER, "abc".parse().unwrap());
        assert_eq!(header_token(&headers), Some("abc"));
    }
}
