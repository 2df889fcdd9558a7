//! Centralized validation functions for rkndaemon.
//!
//! This module provides unified validation for:
//! - IP literals found in registry entries (global-unicast filter)
//! - DNS server and listen addresses from the configuration
//! - Post-processing hook paths

use anyhow::{bail, Result};
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};
use std::sync::LazyLock;

/// Characters that must never appear in a hook path.
///
/// Hooks are executed directly (never through a shell), but a path
/// containing one of these is almost certainly a misconfiguration.
pub const HOOK_FORBIDDEN_CHARS: &[char] = &['|', ';', '`', '*', '?'];

/// Default DNS port used when a server is configured without one.
const DNS_PORT: u16 = 53;

/// Ranges that are never routable on the public internet.
static NON_GLOBAL_NETS: LazyLock<Vec<IpNet>> = LazyLock::new(|| {
    [
        // IPv4
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.0.0.0/24",
        "192.0.2.0/24",
        "192.168.0.0/16",
        "198.18.0.0/15",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "224.0.0.0/4",
        "240.0.0.0/4",
        // IPv6
        "::/128",
        "::1/128",
        "64:ff9b:1::/48",
        "100::/64",
        "2001:db8::/32",
        "fc00::/7",
        "fe80::/10",
        "ff00::/8",
    ]
    .iter()
    .filter_map(|s| s.parse().ok())
    .collect()
});

/// Check whether an address is a global unicast address.
///
/// Private, loopback, link-local, multicast, documentation, shared and
/// reserved ranges are rejected. IPv4-mapped IPv6 addresses are judged by
/// their embedded IPv4 address.
pub fn is_global_unicast(ip: &IpAddr) -> bool {
    let ip = canonical_ip(*ip);
    !NON_GLOBAL_NETS.iter().any(|net| net.contains(&ip))
}

/// Collapse IPv4-mapped IPv6 addresses to plain IPv4.
pub fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Parse an IP literal and keep it only if it is global unicast.
///
/// Returns the canonical address (mapped IPv6 collapsed to IPv4), or `None`
/// for malformed or non-global input.
///
/// # Examples
/// ```
/// use rkndaemon::validation::parse_global_ip;
/// assert!(parse_global_ip("93.184.216.34").is_some());
/// assert!(parse_global_ip("192.168.1.1").is_none());
/// assert!(parse_global_ip("not-an-ip").is_none());
/// ```
pub fn parse_global_ip(literal: &str) -> Option<IpAddr> {
    let ip: IpAddr = literal.trim().parse().ok()?;
    let ip = canonical_ip(ip);
    is_global_unicast(&ip).then_some(ip)
}

/// Check a hook path for shell metacharacters.
///
/// # Examples
/// ```
/// use rkndaemon::validation::is_safe_hook_path;
/// assert!(is_safe_hook_path("/usr/local/bin/reload-lists.sh"));
/// assert!(!is_safe_hook_path("/bin/sh -c 'a; b'"));
/// ```
pub fn is_safe_hook_path(path: &str) -> bool {
    !path.trim().is_empty() && !path.contains(HOOK_FORBIDDEN_CHARS)
}

/// Validate a DNS server address, defaulting the port to 53.
///
/// Accepts `8.8.8.8`, `8.8.8.8:5353`, `2001:4860:4860::8888` and
/// `[2001:4860:4860::8888]:53`.
pub fn validate_dns_server(server: &str) -> Result<SocketAddr> {
    let server = server.trim();
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    match server.parse::<IpAddr>() {
        Ok(ip) => Ok(SocketAddr::new(ip, DNS_PORT)),
        Err(_) => bail!("Invalid DNS server address: {}", server),
    }
}

/// Validate an HTTP listen address such as `127.0.0.1:8080`.
pub fn validate_listen_addr(addr: &str) -> Result<SocketAddr> {
    addr.trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid listen address: {}", addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_ipv4() {
        assert!(parse_global_ip("93.184.216.34").is_some());
        assert!(parse_global_ip("8.8.8.8").is_some());
        assert!(parse_global_ip(" 1.1.1.1 ").is_some());
    }

    #[test]
    fn test_non_global_ipv4_rejected() {
        for ip in [
            "0.0.0.0",
            "10.1.2.3",
            "100.64.0.1",
            "127.0.0.1",
            "169.254.10.10",
            "172.16.5.4",
            "172.31.255.255",
            "192.168.1.1",
            "192.0.2.10",
            "198.18.0.1",
            "198.51.100.7",
            "203.0.113.9",
            "224.0.0.1",
            "240.0.0.1",
            "255.255.255.255",
        ] {
            assert!(parse_global_ip(ip).is_none(), "{} should be rejected", ip);
        }
    }

    #[test]
    fn test_boundaries_of_private_ranges() {
        assert!(parse_global_ip("172.15.255.255").is_some());
        assert!(parse_global_ip("172.32.0.0").is_some());
        assert!(parse_global_ip("100.63.255.255").is_some());
        assert!(parse_global_ip("100.128.0.0").is_some());
    }

    #[test]
    fn test_ipv6() {
        assert!(parse_global_ip("2606:4700:4700::1111").is_some());
        assert!(parse_global_ip("::1").is_none());
        assert!(parse_global_ip("::").is_none());
        assert!(parse_global_ip("fe80::1").is_none());
        assert!(parse_global_ip("fd00::1").is_none());
        assert!(parse_global_ip("ff02::1").is_none());
        assert!(parse_global_ip("2001:db8::1").is_none());
    }

    #[test]
    fn test_mapped_ipv6_collapses() {
        let ip = parse_global_ip("::ffff:93.184.216.34").unwrap();
        assert_eq!(ip.to_string(), "93.184.216.34");
        assert!(parse_global_ip("::ffff:10.0.0.1").is_none());
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(parse_global_ip("").is_none());
        assert!(parse_global_ip("1.2.3").is_none());
        assert!(parse_global_ip("256.1.1.1").is_none());
        assert!(parse_global_ip("1.2.3.4/24").is_none());
        assert!(parse_global_ip("example.com").is_none());
    }

    #[test]
    fn test_hook_path() {
        assert!(is_safe_hook_path("/opt/rkn/post.sh"));
        assert!(!is_safe_hook_path(""));
        assert!(!is_safe_hook_path("   "));
        for bad in ["a|b", "a;b", "a`b`", "/tmp/*.sh", "/tmp/?.sh"] {
            assert!(!is_safe_hook_path(bad), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_dns_server() {
        assert_eq!(
            validate_dns_server("8.8.8.8").unwrap(),
            "8.8.8.8:53".parse().unwrap()
        );
        assert_eq!(
            validate_dns_server("1.1.1.1:5353").unwrap(),
            "1.1.1.1:5353".parse().unwrap()
        );
        assert_eq!(validate_dns_server("2001:4860:4860::8888").unwrap().port(), 53);
        assert!(validate_dns_server("dns.google").is_err());
    }

    #[test]
    fn test_listen_addr() {
        assert!(validate_listen_addr("127.0.0.1:8080").is_ok());
        assert!(validate_listen_addr(":8080").is_err());
        assert!(validate_listen_addr("localhost").is_err());
    }
}
