use std::{
    collections::HashMap,
    num::NonZeroU32,
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultDirectRateLimiter, Quota, RateLimiter,
};
use tracing::debug;

use super::auth::AuthContext;
use super::ip::ClientIp;
use crate::config::{RateLimitConfig, RateLimitRule};
use crate::error::AppError;
use crate::sweeper::PeriodicTask;

/// A thread-safe token bucket.
///
/// Holds its own synchronization, so callers never need the registry lock to
/// consume a token.
pub struct TokenBucket {
    limiter: DefaultDirectRateLimiter,
    clock: DefaultClock,
}

impl TokenBucket {
    pub fn new(rule: RateLimitRule) -> Self {
        Self { limiter: RateLimiter::direct(quota_for(rule)), clock: DefaultClock::default() }
    }

    /// Consumes one token if available.
    pub fn allow(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Consumes one token, or reports how long until the next one is available.
    pub fn check(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

fn quota_for(rule: RateLimitRule) -> Quota {
    let requests = rule.requests.max(1);
    let period = Duration::from_secs(rule.per_seconds.max(1)) / requests;
    let burst = NonZeroU32::new(rule.burst).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst)
}

struct RateLimiterEntry {
    limiter: Arc<TokenBucket>,
    last_accessed: Instant,
}

/// Housekeeping parameters of a [`LimiterRegistry`].
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
    /// Entries idle for longer than this are dropped by the sweep.
    pub entry_ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self { entry_ttl: Duration::from_secs(3600), cleanup_interval: Duration::from_secs(300) }
    }
}

impl From<&RateLimitConfig> for RegistrySettings {
    fn from(cfg: &RateLimitConfig) -> Self {
        Self { entry_ttl: cfg.entry_ttl(), cleanup_interval: cfg.cleanup_interval() }
    }
}

struct RegistryInner {
    name: &'static str,
    rule: RateLimitRule,
    entry_ttl: Duration,
    entries: RwLock<HashMap<String, RateLimiterEntry>>,
}

impl RegistryInner {
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.last_accessed) <= self.entry_ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(registry = self.name, removed, remaining = entries.len(), "Swept idle rate limiters");
        }
        removed
    }
}

/// Keyed collection of token buckets (one per client IP or user ID).
///
/// Buckets are created lazily on first use and removed by a background sweep
/// once idle for longer than the configured TTL. Cloning shares the registry.
#[derive(Clone)]
pub struct LimiterRegistry {
    inner: Arc<RegistryInner>,
    sweeper: Arc<PeriodicTask>,
}

impl LimiterRegistry {
    /// Creates a registry and starts its sweep task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(name: &'static str, rule: RateLimitRule, settings: RegistrySettings) -> Self {
        let inner = Arc::new(RegistryInner {
            name,
            rule,
            entry_ttl: settings.entry_ttl,
            entries: RwLock::new(HashMap::new()),
        });
        let sweep_target = inner.clone();
        let sweeper = PeriodicTask::spawn(name, settings.cleanup_interval, move || {
            sweep_target.sweep();
        });
        Self { inner, sweeper: Arc::new(sweeper) }
    }

    /// Login attempts per client IP.
    pub fn login(cfg: &RateLimitConfig) -> Self {
        Self::new("login", cfg.login, cfg.into())
    }

    /// Trial-lesson requests per client IP.
    pub fn trial_request(cfg: &RateLimitConfig) -> Self {
        Self::new("trial_request", cfg.trial_request, cfg.into())
    }

    /// Payment operations per authenticated user.
    pub fn payment(cfg: &RateLimitConfig) -> Self {
        Self::new("payment", cfg.payment, cfg.into())
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Returns the bucket for `key`, creating it on first use.
    pub fn get_limiter(&self, key: &str) -> Arc<TokenBucket> {
        let now = Instant::now();
        let mut entries = self.inner.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(key) {
            entry.last_accessed = now;
            return entry.limiter.clone();
        }
        let limiter = Arc::new(TokenBucket::new(self.inner.rule));
        entries.insert(key.to_string(), RateLimiterEntry { limiter: limiter.clone(), last_accessed: now });
        limiter
    }

    /// Removes entries idle for longer than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.entries.read().unwrap_or_else(PoisonError::into_inner).contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the background sweep and waits for it to exit. Idempotent.
    pub async fn stop(&self) {
        self.sweeper.stop().await;
    }

    fn enforce(&self, key: &str) -> Result<(), AppError> {
        self.get_limiter(key).check().map_err(|wait| {
            let retry_after_seconds = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            debug!(registry = self.inner.name, key, retry_after_seconds, "Rate limit exceeded");
            AppError::RateLimited { retry_after_seconds: retry_after_seconds.max(1) }
        })
    }
}

/// Rate limits by resolved client IP.
pub async fn rate_limit_by_ip(State(registry): State<LimiterRegistry>, req: Request, next: Next) -> Response {
    let key = ClientIp::of(&req);
    match registry.enforce(&key) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

/// Rate limits by authenticated user, falling back to the client IP for
/// anonymous requests. Must run after the authentication gate.
pub async fn rate_limit_by_user(State(registry): State<LimiterRegistry>, req: Request, next: Next) -> Response {
    let key = match req.extensions().get::<AuthContext>() {
        Some(ctx) => format!("user:{}", ctx.user.id),
        None => format!("ip:{}", ClientIp::of(&req)),
    };
    match registry.enforce(&key) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}
