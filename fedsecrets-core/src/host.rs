use std::net::IpAddr;

use url::{Host, Url};

/// Host name the current request was addressed to, without port.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestHost(String);

impl RequestHost {
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }

    /// Parse an HTTP `Host` header value (`name`, `name:port`, `[v6]:port`).
    pub fn from_authority(authority: &str) -> Self {
        let authority = authority.trim();
        if let Some(rest) = authority.strip_prefix('[') {
            let inner = rest.split(']').next().unwrap_or_default();
            return Self(inner.to_string());
        }
        match authority.rsplit_once(':') {
            Some((name, port))
                if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) =>
            {
                Self(name.to_string())
            }
            _ => Self(authority.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Managed identity only exists on the hosting platform, so requests
    /// addressed to a development machine are answered without it.
    pub fn is_loopback(&self) -> bool {
        is_loopback_host(&self.0)
    }
}

pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim().trim_end_matches('.');
    if host.is_empty() {
        return false;
    }

    let lower = host.to_ascii_lowercase();
    if lower == "localhost" || lower.ends_with(".localhost") {
        return true;
    }

    lower
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

pub fn url_is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => is_loopback_host(domain),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
