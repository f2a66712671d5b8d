use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use url::{Host, Url};

use crate::constants::protocols::ALLOWED_HTTP;
use crate::constants::security::BLOCKED_HOSTNAMES;
use crate::errors::IntegrationError;
use crate::services::logger::Logger;

/// Resolves both A and AAAA records for a host.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemResolver;

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        let mut out: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            if !out.contains(&addr.ip()) {
                out.push(addr.ip());
            }
        }
        Ok(out)
    }
}

/// Fixed host table. Unknown hosts fail like an NXDOMAIN.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, addrs: Vec<IpAddr>) -> Self {
        self.entries.insert(normalize_host(host), addrs);
        self
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
        self.entries
            .get(&normalize_host(host))
            .cloned()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such host")
            })
    }
}

/// A URL that passed validation, together with the addresses it was checked
/// against. Connections must go to `addrs` and nowhere else.
#[derive(Debug, Clone)]
pub struct ValidatedTarget {
    pub url: Url,
    pub host: String,
    pub port: u16,
    pub addrs: Vec<SocketAddr>,
    /// False for IP-literal hosts, which need no pinning.
    pub resolved: bool,
}

fn normalize_host(host: &str) -> String {
    let trimmed = host.trim_end_matches('.');
    let trimmed = trimmed
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(trimmed);
    trimmed.to_ascii_lowercase()
}

fn is_blocked_hostname(host: &str) -> bool {
    BLOCKED_HOSTNAMES.contains(&host) || host.ends_with(".localhost")
}

fn is_blocked_ipv4(addr: &Ipv4Addr) -> bool {
    let [a, b, ..] = addr.octets();
    a == 0
        || a == 10
        || a == 127
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
        || (a == 169 && b == 254)
        || a >= 224
}

fn is_blocked_ipv6(addr: &Ipv6Addr) -> bool {
    if let Some(mapped) = addr.to_ipv4_mapped() {
        return is_blocked_ipv4(&mapped);
    }
    let first = addr.segments()[0];
    addr.is_loopback()
        || addr.is_unspecified()
        || (first & 0xffc0) == 0xfe80
        || (first & 0xfe00) == 0xfc00
        || (first & 0xff00) == 0xff00
}

/// Loopback, private, link-local, multicast, "this network" and broadcast ranges.
pub fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => is_blocked_ipv4(addr),
        IpAddr::V6(addr) => is_blocked_ipv6(addr),
    }
}

#[derive(Clone)]
pub struct UrlGuard {
    logger: Logger,
    resolver: Arc<dyn DnsResolver>,
    allow_private_networks: bool,
}

impl UrlGuard {
    pub fn new(logger: Logger, resolver: Arc<dyn DnsResolver>) -> Self {
        Self {
            logger: logger.child("url_guard"),
            resolver,
            allow_private_networks: false,
        }
    }

    pub fn allow_private_networks(mut self, allow: bool) -> Self {
        self.allow_private_networks = allow;
        self
    }

    fn reject(&self, reason: &str, host: Option<&str>) -> IntegrationError {
        self.logger.warn(
            "Outbound URL rejected",
            Some(&serde_json::json!({ "reason": reason, "host": host })),
        );
        IntegrationError::security_rejected(reason)
    }

    /// Must be given the fully substituted URL.
    pub async fn validate(&self, raw: &str) -> Result<ValidatedTarget, IntegrationError> {
        let url = Url::parse(raw.trim()).map_err(|_| self.reject("URL could not be parsed", None))?;
        if !ALLOWED_HTTP.contains(&url.scheme()) {
            return Err(self.reject("Scheme is not allowed", None));
        }
        let host = url
            .host()
            .ok_or_else(|| self.reject("URL has no host", None))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| self.reject("URL has no port", None))?;

        let (host_label, ips, resolved) = match host {
            Host::Ipv4(ip) => (ip.to_string(), vec![IpAddr::V4(ip)], false),
            Host::Ipv6(ip) => (ip.to_string(), vec![IpAddr::V6(ip)], false),
            Host::Domain(domain) => {
                let label = normalize_host(domain);
                if is_blocked_hostname(&label) {
                    return Err(self.reject("Hostname is blocked", Some(&label)));
                }
                let ips = match self.resolver.resolve(&label, port).await {
                    Ok(ips) => ips,
                    Err(_) => return Err(self.reject("DNS resolution failed", Some(&label))),
                };
                (label, ips, true)
            }
        };
        if is_blocked_hostname(&host_label) {
            return Err(self.reject("Hostname is blocked", Some(&host_label)));
        }
        if ips.is_empty() {
            return Err(self.reject("Host resolved to no addresses", Some(&host_label)));
        }
        if !self.allow_private_networks && ips.iter().any(is_blocked_ip) {
            return Err(self.reject(
                "Host resolves to a private or reserved address",
                Some(&host_label),
            ));
        }

        Ok(ValidatedTarget {
            addrs: ips.into_iter().map(|ip| SocketAddr::new(ip, port)).collect(),
            url,
            host: host_label,
            port,
            resolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{is_blocked_ip, StaticResolver, UrlGuard};
    use crate::constants::security::PUBLIC_REJECTION_MESSAGE;
    use crate::errors::ErrorKind;
    use crate::services::logger::{LogLevel, Logger};
    use std::net::IpAddr;
    use std::sync::Arc;

    fn guard() -> UrlGuard {
        let resolver = StaticResolver::new()
            .with_host("api.example.com", vec!["93.184.216.34".parse().unwrap()])
            .with_host("internal.example.com", vec!["10.0.0.7".parse().unwrap()])
            .with_host(
                "mixed.example.com",
                vec!["93.184.216.34".parse().unwrap(), "fd00::1".parse().unwrap()],
            )
            .with_host("empty.example.com", Vec::new());
        UrlGuard::new(Logger::new("test").with_level(LogLevel::Error), Arc::new(resolver))
    }

    #[tokio::test]
    async fn accepts_public_https_host() {
        let target = guard()
            .validate("https://api.example.com/v1/data")
            .await
            .expect("public host");
        assert_eq!(target.host, "api.example.com");
        assert_eq!(target.port, 443);
        assert_eq!(target.addrs.len(), 1);
        assert!(target.resolved);
    }

    #[tokio::test]
    async fn rejects_loopback_metadata_and_localhost() {
        let guard = guard();
        for url in [
            "http://127.0.0.1/admin",
            "http://169.254.169.254/latest/meta-data",
            "http://localhost/",
            "http://LOCALHOST./",
            "http://metadata.google.internal/",
            "http://app.localhost/",
            "http://[::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://0.0.0.0/",
        ] {
            let err = guard.validate(url).await.expect_err(url);
            assert_eq!(err.kind, ErrorKind::SecurityRejected, "{}", url);
            assert_eq!(err.public_message(), PUBLIC_REJECTION_MESSAGE);
        }
    }

    #[tokio::test]
    async fn rejects_disallowed_schemes() {
        let guard = guard();
        for url in ["ftp://api.example.com/", "file:///etc/passwd", "not a url"] {
            let err = guard.validate(url).await.expect_err(url);
            assert_eq!(err.kind, ErrorKind::SecurityRejected);
        }
    }

    #[tokio::test]
    async fn dns_failures_fail_closed() {
        let guard = guard();
        for url in ["https://unknown.example.com/", "https://empty.example.com/"] {
            let err = guard.validate(url).await.expect_err(url);
            assert_eq!(err.kind, ErrorKind::SecurityRejected);
        }
    }

    #[tokio::test]
    async fn any_private_address_rejects_the_host() {
        let guard = guard();
        for url in ["https://internal.example.com/", "https://mixed.example.com/"] {
            assert!(guard.validate(url).await.is_err(), "{}", url);
        }
    }

    #[tokio::test]
    async fn private_networks_can_be_allowed_but_denylist_still_applies() {
        let guard = guard().allow_private_networks(true);
        assert!(guard.validate("https://internal.example.com/").await.is_ok());
        assert!(guard.validate("http://127.0.0.1:8080/").await.is_ok());
        assert!(guard.validate("http://localhost/").await.is_err());
    }

    #[test]
    fn classifies_reserved_ranges() {
        let blocked = [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.1",
            "169.254.169.254",
            "224.0.0.1",
            "0.1.2.3",
            "255.255.255.255",
            "::1",
            "::",
            "fe80::1",
            "fc00::1",
            "fd12:3456::1",
            "ff02::1",
        ];
        for raw in blocked {
            let ip: IpAddr = raw.parse().unwrap();
            assert!(is_blocked_ip(&ip), "{}", raw);
        }
        for raw in ["93.184.216.34", "172.32.0.1", "8.8.8.8", "2606:4700::1111"] {
            let ip: IpAddr = raw.parse().unwrap();
            assert!(!is_blocked_ip(&ip), "{}", raw);
        }
    }
}
