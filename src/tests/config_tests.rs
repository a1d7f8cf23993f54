use std::{env, fs, time::Duration};

use crate::config::{self, AppConfig, Environment, RateLimitRule};
use crate::middleware::cookie::{CookieSettings, SameSite};

#[test]
fn test_embedded_defaults_match_default_impl() {
    let parsed = config::from_toml_str("").unwrap();
    let default = AppConfig::default();

    assert_eq!(parsed.server.host, default.server.host);
    assert_eq!(parsed.server.port, default.server.port);
    assert_eq!(parsed.session.environment, default.session.environment);
    assert_eq!(parsed.session.lifetime_seconds, default.session.lifetime_seconds);
    assert_eq!(parsed.session.refresh_buffer_seconds, default.session.refresh_buffer_seconds);
    assert!(parsed.proxy.trusted.is_empty());
    assert_eq!(parsed.rate_limit.login, default.rate_limit.login);
    assert_eq!(parsed.rate_limit.trial_request, RateLimitRule::new(5, 600, 5));
    assert_eq!(parsed.rate_limit.payment, default.rate_limit.payment);
    assert_eq!(parsed.rate_limit.entry_ttl(), Duration::from_secs(3600));
    assert_eq!(parsed.rate_limit.cleanup_interval(), Duration::from_secs(300));
    assert_eq!(parsed.csrf.max_tokens_per_session, 10);
    assert_eq!(parsed.body_limit.json_bytes, 1024 * 1024);
    assert_eq!(parsed.body_limit.upload_bytes, 10 * 1024 * 1024);
}

#[test]
fn test_overrides_are_layered_over_defaults() {
    let cfg = config::from_toml_str(
        r#"
        [session]
        environment = "production"
        same_site = "STRICT"

        [proxy]
        trusted = ["10.0.0.1", "[::1]:8080"]

        [rate_limit.login]
        requests = 3
        per_seconds = 60
        burst = 3
        "#,
    )
    .unwrap();

    assert_eq!(cfg.session.environment, Environment::Production);
    assert!(cfg.session.is_production());
    assert_eq!(cfg.rate_limit.login, RateLimitRule::new(3, 60, 3));
    // untouched keys keep their defaults
    assert_eq!(cfg.session.lifetime_seconds, 604800);
    assert_eq!(cfg.proxy.trusted.len(), 2);

    let cookies = CookieSettings::from(&cfg.session);
    assert!(cookies.secure);
    assert_eq!(cookies.same_site, SameSite::Strict);
}

#[test]
fn test_zero_values_are_rejected() {
    for (toml, needle) in [
        ("[server]\nport = 0", "server.port"),
        ("[session]\nlifetime_seconds = 0", "session.lifetime_seconds"),
        ("[rate_limit.payment]\nrequests = 0\nper_seconds = 60\nburst = 1", "rate_limit.payment"),
        ("[rate_limit]\nentry_ttl_seconds = 0", "entry_ttl_seconds"),
        ("[csrf]\nmax_tokens_per_session = 0", "max_tokens_per_session"),
        ("[body_limit]\njson_bytes = 0", "body_limit"),
    ] {
        let err = config::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains(needle), "{toml:?} -> {err}");
    }
}

#[test]
fn test_unknown_environment_is_an_error() {
    assert!(config::from_toml_str("[session]\nenvironment = \"staging\"").is_err());
}

#[test]
fn test_config_file_from_env_path() {
    let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    fs::write(file.path(), "[server]\nport = 9191\n\n[csrf]\ntoken_ttl_seconds = 60\n").unwrap();

    env::set_var("TUTORGATE_CONFIG", file.path());
    let result = config::load();
    env::remove_var("TUTORGATE_CONFIG");

    let cfg = result.unwrap();
    assert_eq!(cfg.server.port, 9191);
    assert_eq!(cfg.csrf.token_ttl_seconds, 60);
    assert_eq!(cfg.csrf.cleanup_interval_seconds, 3600);
}
