//! Hostname lookup sources.
//!
//! Every hostname is looked up through two independent sources: the
//! configured recursive DNS servers and the host's own resolver. Either may
//! fail without affecting the other.

use async_trait::async_trait;
use dns_lookup::{AddrInfoHints, LookupErrorKind, SockType};
use hickory_resolver::config::{
    LookupIpStrategy, NameServerConfig, ResolverConfig, ResolverOpts,
};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::proto::ProtoErrorKind;
use hickory_resolver::{ResolveError, ResolveErrorKind, Resolver, TokioResolver};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Attempts per query against the configured servers.
pub const UPSTREAM_ATTEMPTS: usize = 3;

/// Per-attempt timeout against the configured servers.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for one system resolver call.
const SYSTEM_TIMEOUT: Duration = Duration::from_secs(15);

/// Why a lookup returned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupFailure {
    /// The name does not exist or has no A records.
    NotFound,
    Timeout,
    /// SERVFAIL-style answer or a permanent resolver failure.
    ServerMisbehaving,
    Other,
}

impl LookupFailure {
    /// Failures that are routine at registry scale and not worth logging.
    pub fn is_expected(self) -> bool {
        !matches!(self, LookupFailure::Other)
    }
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct LookupError {
    pub kind: LookupFailure,
    pub message: String,
}

impl LookupError {
    pub fn new(kind: LookupFailure, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A source of A records.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HostLookup: Send + Sync {
    /// Short label used in log lines.
    fn name(&self) -> &'static str;

    /// IPv4 addresses of `host`, possibly with duplicates.
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, LookupError>;
}

/// Lookup through the configured recursive DNS servers.
pub struct UpstreamLookup {
    resolver: TokioResolver,
}

impl UpstreamLookup {
    pub fn new(servers: &[SocketAddr]) -> Self {
        let mut config = ResolverConfig::new();
        for server in servers {
            config.add_name_server(NameServerConfig::new(*server, Protocol::Udp));
        }

        let mut opts = ResolverOpts::default();
        opts.attempts = UPSTREAM_ATTEMPTS;
        opts.timeout = UPSTREAM_TIMEOUT;
        opts.ip_strategy = LookupIpStrategy::Ipv4Only;
        opts.cache_size = 0;
        opts.ndots = 0;

        let resolver = Resolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(opts)
            .build();

        Self { resolver }
    }
}

fn classify_resolve_error(err: &ResolveError) -> LookupFailure {
    if err.is_nx_domain() || err.is_no_records_found() {
        return LookupFailure::NotFound;
    }
    match err.kind() {
        ResolveErrorKind::Proto(proto) if matches!(proto.kind(), ProtoErrorKind::Timeout) => {
            LookupFailure::Timeout
        }
        _ => LookupFailure::Other,
    }
}

#[async_trait]
impl HostLookup for UpstreamLookup {
    fn name(&self) -> &'static str {
        "upstream"
    }

    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, LookupError> {
        match self.resolver.lookup_ip(host).await {
            Ok(lookup) => Ok(lookup.iter().filter_map(ipv4_only).collect()),
            Err(e) => Err(LookupError::new(classify_resolve_error(&e), e.to_string())),
        }
    }
}

/// Lookup through the operating system's resolver (`getaddrinfo`).
#[derive(Debug, Clone, Default)]
pub struct SystemLookup;

fn classify_system_error(kind: LookupErrorKind) -> LookupFailure {
    match kind {
        LookupErrorKind::NoName | LookupErrorKind::NoData => LookupFailure::NotFound,
        LookupErrorKind::Again => LookupFailure::Timeout,
        LookupErrorKind::Fail => LookupFailure::ServerMisbehaving,
        _ => LookupFailure::Other,
    }
}

#[async_trait]
impl HostLookup for SystemLookup {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, LookupError> {
        let owned = host.to_string();
        let task = tokio::task::spawn_blocking(move || {
            let hints = AddrInfoHints {
                socktype: SockType::Stream.into(),
                ..AddrInfoHints::default()
            };
            dns_lookup::getaddrinfo(Some(&owned), None, Some(hints)).map(|addrs| {
                addrs
                    .filter_map(Result::ok)
                    .filter_map(|info| ipv4_only(info.sockaddr.ip()))
                    .collect::<Vec<_>>()
            })
        });

        match tokio::time::timeout(SYSTEM_TIMEOUT, task).await {
            Ok(Ok(Ok(addrs))) => Ok(addrs),
            Ok(Ok(Err(e))) => Err(LookupError::new(
                classify_system_error(e.kind()),
                format!("getaddrinfo: {:?}", e.kind()),
            )),
            Ok(Err(e)) => Err(LookupError::new(LookupFailure::Other, e.to_string())),
            Err(_) => Err(LookupError::new(LookupFailure::Timeout, "getaddrinfo timed out")),
        }
    }
}

fn ipv4_only(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_failures() {
        assert!(LookupFailure::NotFound.is_expected());
        assert!(LookupFailure::Timeout.is_expected());
        assert!(LookupFailure::ServerMisbehaving.is_expected());
        assert!(!LookupFailure::Other.is_expected());
    }

    #[test]
    fn test_classify_system_error() {
        assert_eq!(classify_system_error(LookupErrorKind::NoName), LookupFailure::NotFound);
        assert_eq!(classify_system_error(LookupErrorKind::Again), LookupFailure::Timeout);
        assert_eq!(
            classify_system_error(LookupErrorKind::Fail),
            LookupFailure::ServerMisbehaving
        );
        assert_eq!(classify_system_error(LookupErrorKind::Memory), LookupFailure::Other);
    }

    #[test]
    fn test_ipv4_only() {
        assert_eq!(
            ipv4_only("93.184.216.34".parse().unwrap()),
            Some(Ipv4Addr::new(93, 184, 216, 34))
        );
        assert_eq!(
            ipv4_only("::ffff:93.184.216.34".parse().unwrap()),
            Some(Ipv4Addr::new(93, 184, 216, 34))
        );
        assert_eq!(ipv4_only("2001:db8::1".parse().unwrap()), None);
    }

    #[tokio::test]
    async fn test_system_lookup_localhost() {
        let addrs = SystemLookup.lookup_ipv4("localhost").await.unwrap_or_default();
        // Hosts without an IPv4 loopback entry are fine, but nothing else may appear.
        assert!(addrs.iter().all(|a| a.is_loopback()));
    }

    #[tokio::test]
    async fn test_upstream_lookup_builds() {
        let _lookup = UpstreamLookup::new(&["127.0.0.1:53".parse().unwrap()]);
    }

    #[tokio::test]
    async fn test_mock_lookup() {
        let mut mock = MockHostLookup::new();
        mock.expect_lookup_ipv4()
            .withf(|host| host == "a.test")
            .returning(|_| Ok(vec![Ipv4Addr::new(203, 0, 113, 1)]));
        assert_eq!(
            mock.lookup_ipv4("a.test").await.unwrap(),
            vec![Ipv4Addr::new(203, 0, 113, 1)]
        );
    }
}
