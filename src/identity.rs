use axum::http::HeaderMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

// Catch-all key when no address can be recovered at all
pub const ANONYMOUS: &str = "anonymous";

/// Key for all per-client admission state: the host portion of the remote
/// address, port stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves the identity from the raw remote address, falling back to the
/// forwarded client IP headers and finally to [`ANONYMOUS`].
pub fn client_identity(remote: Option<&str>, headers: &HeaderMap) -> ClientIdentity {
    if let Some(host) = remote.and_then(split_host) {
        return ClientIdentity::new(host);
    }
    if let Some(ip) = forwarded_client_ip(headers) {
        return ClientIdentity::new(ip.to_string());
    }
    tracing::debug!(remote = ?remote, "no usable client address, using anonymous identity");
    ClientIdentity::new(ANONYMOUS)
}

// "1.2.3.4:80", "[::1]:80", or a bare IP
fn split_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Some(addr.ip().to_string());
    }
    if let Ok(ip) = raw.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return Some(ip.to_string());
    }
    None
}

fn forwarded_client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let from_forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());

    from_forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    })
}
