use std::sync::Arc;

use tracing::info;

use crate::config::{AppConfig, RateLimitConfig};
use crate::middleware::{
    body_limit::BodyLimits,
    cookie::CookieSettings,
    csrf::{CsrfSettings, CsrfStore},
    AuthGate, LimiterRegistry, TrustedProxies,
};
use crate::session::SessionService;

/// Per-purpose rate limiter registries.
///
/// Only `login` is mounted by [`crate::routes::router`]. `trial_request` and
/// `payment` are built and swept here for the business routes that mount
/// this crate's middleware, via `rate_limit_by_ip` / `rate_limit_by_user`.
#[derive(Clone)]
pub struct RateLimiters {
    /// Login attempts, keyed by client IP.
    pub login: LimiterRegistry,
    /// Trial lesson requests, keyed by client IP.
    pub trial_request: LimiterRegistry,
    /// Payment operations, keyed by user.
    pub payment: LimiterRegistry,
}

impl RateLimiters {
    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self {
            login: LimiterRegistry::login(cfg),
            trial_request: LimiterRegistry::trial_request(cfg),
            payment: LimiterRegistry::payment(cfg),
        }
    }

    pub async fn stop(&self) {
        self.login.stop().await;
        self.trial_request.stop().await;
        self.payment.stop().await;
    }
}

/// The shared application state.
///
/// Cheap to clone; every component is reference counted. Constructing it
/// spawns the background sweeps of the rate limiters and the CSRF store, so
/// it must happen inside a Tokio runtime.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Session and user lookups.
    pub sessions: Arc<dyn SessionService>,
    pub auth: AuthGate,
    pub csrf: CsrfStore,
    pub limiters: RateLimiters,
    pub proxies: Arc<TrustedProxies>,
    pub body_limits: BodyLimits,
}

impl AppState {
    pub fn new(config: AppConfig, sessions: Arc<dyn SessionService>) -> Self {
        let proxies = TrustedProxies::new(&config.proxy.trusted);
        if !proxies.is_empty() {
            info!(count = proxies.len(), "Trusting forwarding headers from configured proxies");
        }

        Self {
            auth: AuthGate::new(sessions.clone(), CookieSettings::from(&config.session)),
            csrf: CsrfStore::new(CsrfSettings::from(&config.csrf)),
            limiters: RateLimiters::from_config(&config.rate_limit),
            proxies: Arc::new(proxies),
            body_limits: BodyLimits::from(&config.body_limit),
            config: Arc::new(config),
            sessions,
        }
    }

    /// Stops all background sweeps and waits for them to exit.
    pub async fn shutdown(&self) {
        self.limiters.stop().await;
        self.csrf.stop().await;
        info!("Background cleanup tasks stopped");
    }
}
