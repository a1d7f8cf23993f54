//! Session cookie helpers.

use std::fmt;

use axum::http::{header, header::InvalidHeaderValue, HeaderMap, HeaderValue};

use crate::config::SessionConfig;

pub const SESSION_COOKIE_NAME: &str = "session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    /// Case-insensitive; anything unrecognised becomes `Lax`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => SameSite::Strict,
            "none" => SameSite::None,
            _ => SameSite::Lax,
        }
    }
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        })
    }
}

/// Attributes applied to every session cookie the service sets.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub secure: bool,
    pub same_site: SameSite,
    pub max_age_seconds: u64,
}

impl From<&SessionConfig> for CookieSettings {
    fn from(cfg: &SessionConfig) -> Self {
        Self {
            secure: cfg.is_production(),
            same_site: SameSite::parse(&cfg.same_site),
            max_age_seconds: cfg.lifetime_seconds,
        }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

fn build(value: &str, max_age: u64, settings: &CookieSettings) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={value}; Path=/; Max-Age={max_age}; HttpOnly; SameSite={}",
        settings.same_site
    );
    if settings.secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// `Set-Cookie` value carrying a session token.
pub fn session_cookie(token: &str, settings: &CookieSettings) -> Result<HeaderValue, InvalidHeaderValue> {
    build(token, settings.max_age_seconds, settings)
}

/// `Set-Cookie` value that makes the browser drop the session cookie.
pub fn clear_session_cookie(settings: &CookieSettings) -> Result<HeaderValue, InvalidHeaderValue> {
    build("", 0, settings)
}

/// Finds a cookie by name across all `Cookie` headers.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}
