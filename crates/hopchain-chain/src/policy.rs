//! Routing policies attached to nodes: bypass, host overrides and resolvers.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use ipnet::IpNet;

use crate::error::ChainError;

/// Decides whether traffic to an address skips a node.
pub trait Bypass: Send + Sync + 'static {
    /// `addr` is `host` or `host:port`.
    fn contains(&self, addr: &str) -> bool;
}

/// Static host name overrides, consulted before the resolver.
pub trait HostMapper: Send + Sync + 'static {
    fn lookup(&self, network: &str, host: &str) -> Option<Vec<IpAddr>>;
}

#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    async fn resolve(&self, network: &str, host: &str) -> Result<Vec<IpAddr>, ChainError>;
}

// ── Bypass ──

#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    Ip(IpAddr),
    Cidr(IpNet),
    /// Exact domain.
    Domain(String),
    /// `*.example.com` or `.example.com`: the domain and all subdomains.
    Suffix(String),
}

impl Matcher {
    fn parse(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return None;
        }
        if let Ok(ip) = pattern.parse::<IpAddr>() {
            return Some(Matcher::Ip(ip));
        }
        if let Ok(net) = pattern.parse::<IpNet>() {
            return Some(Matcher::Cidr(net));
        }
        let lower = pattern.to_ascii_lowercase();
        if let Some(suffix) = lower.strip_prefix("*.").or_else(|| lower.strip_prefix('.')) {
            return Some(Matcher::Suffix(suffix.to_string()));
        }
        Some(Matcher::Domain(lower))
    }

    fn matches(&self, host: &str, ip: Option<IpAddr>) -> bool {
        match (self, ip) {
            (Matcher::Ip(want), Some(ip)) => *want == ip,
            (Matcher::Cidr(net), Some(ip)) => net.contains(&ip),
            (Matcher::Domain(d), None) => host.eq_ignore_ascii_case(d),
            (Matcher::Suffix(s), None) => {
                let host = host.to_ascii_lowercase();
                host == *s || host.ends_with(&format!(".{s}"))
            }
            _ => false,
        }
    }
}

/// Pattern-list bypass.
///
/// Patterns are IP literals, CIDR blocks, domains and domain wildcards. With
/// `whitelist` set the meaning flips: only matching addresses use the node.
#[derive(Debug, Clone, Default)]
pub struct BypassList {
    matchers: Vec<Matcher>,
    whitelist: bool,
}

impl BypassList {
    pub fn new<I, S>(patterns: I, whitelist: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            matchers: patterns
                .into_iter()
                .filter_map(|p| Matcher::parse(p.as_ref()))
                .collect(),
            whitelist,
        }
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl Bypass for BypassList {
    fn contains(&self, addr: &str) -> bool {
        if self.matchers.is_empty() || addr.is_empty() {
            return false;
        }
        let host = split_host_port(addr).map_or(addr, |(h, _)| h);
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let ip = host.parse::<IpAddr>().ok();
        let matched = self.matchers.iter().any(|m| m.matches(host, ip));
        matched != self.whitelist
    }
}

// ── Hosts ──

/// In-memory host table.
///
/// Keys starting with `.` match the domain and every subdomain.
#[derive(Debug, Clone, Default)]
pub struct StaticHosts {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticHosts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host: &str, ip: IpAddr) {
        self.entries
            .entry(host.to_ascii_lowercase())
            .or_default()
            .push(ip);
    }

    fn find(&self, host: &str) -> Option<&Vec<IpAddr>> {
        let host = host.to_ascii_lowercase();
        if let Some(ips) = self.entries.get(&host) {
            return Some(ips);
        }
        // walk up the labels looking for a `.domain` wildcard
        let mut rest = host.as_str();
        loop {
            if let Some(ips) = self.entries.get(&format!(".{rest}")) {
                return Some(ips);
            }
            match rest.split_once('.') {
                Some((_, parent)) => rest = parent,
                None => return None,
            }
        }
    }
}

impl HostMapper for StaticHosts {
    fn lookup(&self, network: &str, host: &str) -> Option<Vec<IpAddr>> {
        let ips: Vec<IpAddr> = self
            .find(host)?
            .iter()
            .copied()
            .filter(|ip| family_allows(network, ip))
            .collect();
        (!ips.is_empty()).then_some(ips)
    }
}

// ── Resolver ──

/// Resolver backed by the operating system.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, network: &str, host: &str) -> Result<Vec<IpAddr>, ChainError> {
        let ips: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
            .await?
            .map(|sa| sa.ip())
            .filter(|ip| family_allows(network, ip))
            .collect();
        Ok(ips)
    }
}

/// Whether `ip` belongs to the address family selected by `network`
/// (`tcp4`, `udp6`, `ip4`, ...). Unsuffixed networks allow both.
pub fn family_allows(network: &str, ip: &IpAddr) -> bool {
    match network.as_bytes().last() {
        Some(b'4') => ip.is_ipv4(),
        Some(b'6') => ip.is_ipv6(),
        _ => true,
    }
}

/// Split `host:port` or `[v6]:port`.
pub fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        return Some((host, tail.strip_prefix(':')?));
    }
    let (host, port) = addr.rsplit_once(':')?;
    if host.contains(':') {
        return None;
    }
    Some((host, port))
}

/// Join host and port, bracketing IPv6 hosts.
pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_patterns() {
        let b = BypassList::new(["10.0.0.0/8", "192.168.1.1", "*.internal", "example.org"], false);
        assert_eq!(b.len(), 4);
        assert!(b.contains("10.2.3.4:80"));
        assert!(b.contains("192.168.1.1"));
        assert!(!b.contains("192.168.1.2:22"));
        assert!(b.contains("db.internal:5432"));
        assert!(b.contains("internal:1"));
        assert!(b.contains("EXAMPLE.org:443"));
        assert!(!b.contains("www.example.org:443"));
        assert!(!b.contains(""));
    }

    #[test]
    fn bypass_ipv6_and_whitelist() {
        let b = BypassList::new(["2001:db8::/32"], false);
        assert!(b.contains("[2001:db8::1]:443"));
        assert!(!b.contains("[2001:db9::1]:443"));

        let w = BypassList::new(["*.corp"], true);
        assert!(!w.contains("git.corp:22"));
        assert!(w.contains("github.com:22"));
    }

    #[test]
    fn empty_bypass_matches_nothing() {
        let b = BypassList::new(Vec::<String>::new(), true);
        assert!(!b.contains("anything:1"));
    }

    #[test]
    fn hosts_exact_wildcard_and_family() {
        let mut h = StaticHosts::new();
        h.insert("relay.local", "10.0.0.5".parse().unwrap());
        h.insert("relay.local", "fd00::5".parse().unwrap());
        h.insert(".svc", "10.9.9.9".parse().unwrap());

        let all = h.lookup("tcp", "Relay.Local").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(
            h.lookup("tcp6", "relay.local").unwrap(),
            vec!["fd00::5".parse::<IpAddr>().unwrap()]
        );
        assert_eq!(
            h.lookup("ip", "a.b.svc").unwrap(),
            vec!["10.9.9.9".parse::<IpAddr>().unwrap()]
        );
        assert!(h.lookup("tcp6", "a.svc").is_none());
        assert!(h.lookup("tcp", "unknown").is_none());
    }

    #[test]
    fn host_port_helpers() {
        assert_eq!(split_host_port("a:1"), Some(("a", "1")));
        assert_eq!(split_host_port("[::1]:53"), Some(("::1", "53")));
        assert_eq!(split_host_port("::1"), None);
        assert_eq!(split_host_port("noport"), None);
        assert_eq!(join_host_port("::1", "53"), "[::1]:53");
        assert_eq!(join_host_port("a", "1"), "a:1");
    }

    #[tokio::test]
    async fn system_resolver_handles_literals() {
        let ips = SystemResolver.resolve("tcp4", "127.0.0.1").await.unwrap();
        assert_eq!(ips, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
        let ips = SystemResolver.resolve("tcp6", "127.0.0.1").await.unwrap();
        assert!(ips.is_empty());
    }
}
