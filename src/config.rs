use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Deployment environment. Only `Production` marks cookies `Secure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub environment: Environment,
    /// Raw `SameSite` value; parsed leniently by [`crate::middleware::cookie::SameSite::parse`].
    pub same_site: String,
    pub lifetime_seconds: u64,
    /// Sessions expiring within this window are flagged for token renewal.
    pub refresh_buffer_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProxyConfig {
    /// Addresses of reverse proxies whose forwarding headers are believed.
    #[serde(default)]
    pub trusted: Vec<String>,
}

/// `requests` tokens refill every `per_seconds`; `burst` is the bucket capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitRule {
    pub requests: u32,
    pub per_seconds: u64,
    pub burst: u32,
}

impl RateLimitRule {
    pub const fn new(requests: u32, per_seconds: u64, burst: u32) -> Self {
        Self { requests, per_seconds, burst }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub cleanup_interval_seconds: u64,
    pub entry_ttl_seconds: u64,
    pub login: RateLimitRule,
    pub trial_request: RateLimitRule,
    pub payment: RateLimitRule,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsrfConfig {
    pub token_ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub max_tokens_per_session: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BodyLimitConfig {
    pub json_bytes: usize,
    pub upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub rate_limit: RateLimitConfig,
    pub csrf: CsrfConfig,
    pub body_limit: BodyLimitConfig,
}

// Mirror defaults from config/default.toml

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8080 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            same_site: "lax".to_string(),
            lifetime_seconds: 7 * 24 * 3600,
            refresh_buffer_seconds: 24 * 3600,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: 300,
            entry_ttl_seconds: 3600,
            login: RateLimitRule::new(10, 60, 10),
            trial_request: RateLimitRule::new(5, 600, 5),
            payment: RateLimitRule::new(10, 60, 10),
        }
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self { token_ttl_seconds: 24 * 3600, cleanup_interval_seconds: 3600, max_tokens_per_session: 10 }
    }
}

impl Default for BodyLimitConfig {
    fn default() -> Self {
        Self { json_bytes: 1024 * 1024, upload_bytes: 10 * 1024 * 1024 }
    }
}

impl SessionConfig {
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

impl RateLimitConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_seconds)
    }
}

const DEFAULTS: &str = include_str!("../config/default.toml");

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: tutorgate.toml (in CWD)
        .add_source(::config::File::with_name("tutorgate").required(false));

    if let Ok(custom_path) = std::env::var("TUTORGATE_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(
        ::config::Environment::with_prefix("TUTORGATE")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("proxy.trusted"),
    );

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

/// Parses a configuration from a TOML string layered over the embedded defaults.
pub fn from_toml_str(overrides: &str) -> anyhow::Result<AppConfig> {
    let cfg = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        .add_source(::config::File::from_str(overrides, ::config::FileFormat::Toml))
        .build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

fn validate_rule(name: &str, rule: &RateLimitRule) -> anyhow::Result<()> {
    if rule.requests == 0 || rule.per_seconds == 0 || rule.burst == 0 {
        return Err(anyhow::anyhow!(
            "rate_limit.{name}: requests, per_seconds and burst must all be > 0"
        ));
    }
    Ok(())
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    // Session
    if cfg.session.lifetime_seconds == 0 {
        return Err(anyhow::anyhow!("session.lifetime_seconds must be > 0"));
    }
    if cfg.session.refresh_buffer_seconds >= cfg.session.lifetime_seconds {
        tracing::warn!(
            "session.refresh_buffer_seconds >= lifetime_seconds: every request will renew its session"
        );
    }
    if cfg.session.is_production() && cfg.session.same_site.trim().eq_ignore_ascii_case("none") {
        tracing::info!("SameSite=None in production; cookies are Secure so cross-site use stays possible");
    }

    // Rate limiting
    if cfg.rate_limit.cleanup_interval_seconds == 0 {
        return Err(anyhow::anyhow!("rate_limit.cleanup_interval_seconds must be > 0"));
    }
    if cfg.rate_limit.entry_ttl_seconds == 0 {
        return Err(anyhow::anyhow!("rate_limit.entry_ttl_seconds must be > 0"));
    }
    validate_rule("login", &cfg.rate_limit.login)?;
    validate_rule("trial_request", &cfg.rate_limit.trial_request)?;
    validate_rule("payment", &cfg.rate_limit.payment)?;

    // CSRF
    if cfg.csrf.token_ttl_seconds == 0 {
        return Err(anyhow::anyhow!("csrf.token_ttl_seconds must be > 0"));
    }
    if cfg.csrf.cleanup_interval_seconds == 0 {
        return Err(anyhow::anyhow!("csrf.cleanup_interval_seconds must be > 0"));
    }
    if cfg.csrf.max_tokens_per_session == 0 {
        return Err(anyhow::anyhow!("csrf.max_tokens_per_session must be > 0"));
    }

    // Body limits
    if cfg.body_limit.json_bytes == 0 || cfg.body_limit.upload_bytes == 0 {
        return Err(anyhow::anyhow!("body_limit values must be > 0"));
    }

    Ok(())
}
