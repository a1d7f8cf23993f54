//! Client IP derivation that resists `X-Forwarded-For` / `X-Real-IP` spoofing.
//!
//! Forwarding headers are only consulted when the transport peer is a
//! configured trusted proxy. The forwarded chain is then read right to left,
//! so entries a client prepends itself can never win over the address the
//! first trusted hop observed.

use std::{
    collections::HashSet,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    extract::{connect_info::ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Key used when the transport peer address is not available at all.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Set of reverse proxies whose forwarding headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    addrs: HashSet<IpAddr>,
}

impl TrustedProxies {
    /// Builds the set from configuration strings.
    ///
    /// Entries may carry a port (`10.0.0.1:8080`, `[::1]:443`); it is stripped.
    /// Entries that are not IP addresses are dropped. Duplicates collapse.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut addrs = HashSet::new();
        for entry in entries {
            let raw = entry.as_ref();
            match parse_ip(strip_port(raw)) {
                Some(ip) => {
                    addrs.insert(ip);
                }
                None => debug!(entry = %sanitize_for_logging(raw), "Ignoring invalid trusted proxy entry"),
            }
        }
        Self { addrs }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.addrs.contains(&ip.to_canonical())
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

/// Removes a `:port` suffix and IPv6 brackets from a peer address.
///
/// Bare IPv6 literals (`2001:db8::1`) are returned unchanged.
pub fn strip_port(addr: &str) -> &str {
    let addr = addr.trim();
    if let Some(rest) = addr.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &rest[..end],
            None => rest,
        };
    }
    if addr.parse::<IpAddr>().is_ok() {
        return addr;
    }
    match addr.rsplit_once(':') {
        // exactly one colon: host:port
        Some((host, _)) if !host.contains(':') => host,
        _ => addr,
    }
}

/// Parses an address, folding IPv4-mapped IPv6 (`::ffff:a.b.c.d`) to plain IPv4.
fn parse_ip(s: &str) -> Option<IpAddr> {
    s.parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
}

/// Derives the client address for a request.
///
/// 1. An untrusted peer is the client; headers are ignored entirely.
/// 2. Behind a trusted peer, the rightmost `X-Forwarded-For` entry that is a
///    valid IP and not itself a trusted proxy is the client.
/// 3. Otherwise `X-Real-IP` if valid, else the peer address.
pub fn resolve_client_ip(remote_addr: &str, headers: &HeaderMap, trusted: &TrustedProxies) -> String {
    let direct = strip_port(remote_addr);
    let direct_ip = match parse_ip(direct) {
        Some(ip) => ip,
        None => return direct.to_string(),
    };
    if !trusted.contains(&direct_ip) {
        return direct_ip.to_string();
    }

    let forwarded: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    for candidate in forwarded.iter().flat_map(|v| v.split(',')).rev() {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }
        match parse_ip(candidate) {
            Some(ip) if trusted.contains(&ip) => continue,
            Some(ip) => return ip.to_string(),
            None => {
                warn!(
                    peer = %direct_ip,
                    entry = %sanitize_for_logging(candidate),
                    "Invalid X-Forwarded-For entry, possible spoofing attempt"
                );
            }
        }
    }

    if let Some(ip) = headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| parse_ip(s.trim()))
    {
        return ip.to_string();
    }

    direct_ip.to_string()
}

/// Sanitizes header content before it reaches the logs.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control())
        .take(64)
        .collect::<String>()
        .replace('"', "\\\"")
}

/// Resolved client address, stored in request extensions by [`client_ip_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    /// Reads the resolved address, falling back to the raw peer address when
    /// the resolver middleware did not run.
    pub fn of(req: &Request) -> String {
        if let Some(ClientIp(ip)) = req.extensions().get::<ClientIp>() {
            return ip.clone();
        }
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

/// Resolves the client address once per request and stores it as [`ClientIp`].
pub async fn client_ip_middleware(
    State(trusted): State<Arc<TrustedProxies>>,
    mut req: Request,
    next: Next,
) -> Response {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
    let ip = resolve_client_ip(&remote, req.headers(), &trusted);
    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}
