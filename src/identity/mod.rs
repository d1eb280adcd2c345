//! Client identity resolution for rate limiting and audit keys.
//!
//! Flow Overview:
//! 1) An authenticated subject id wins over any network-derived identity.
//! 2) The forwarded-for header is honored only when the direct peer is a
//!    configured trusted proxy; untrusted peers are keyed by their own
//!    address no matter what headers they send.
//! 3) Resolved addresses are sanitized and strictly re-parsed; anything
//!    malformed collapses to a fixed sentinel instead of leaking into
//!    counter keys or logs.

use ipnetwork::IpNetwork;
use regex::Regex;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use uuid::Uuid;

/// Address used when a client IP cannot be resolved to a valid shape.
pub const SENTINEL_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Stable identity key for an inbound request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    /// Authenticated principal.
    User(Uuid),
    /// Proxy-validated (or direct) client address.
    Ip(IpAddr),
}

impl ClientIdentity {
    /// Key form used by counters and audit events.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Ip(addr) => write!(f, "ip:{addr}"),
        }
    }
}

/// Intermediaries whose forwarded-client-address claims are believed.
///
/// Anything not listed here, exactly or by CIDR block, is treated as an
/// untrusted peer and its forwarding headers are ignored.
#[derive(Clone, Debug, Default)]
pub struct TrustedProxies {
    addresses: Vec<IpAddr>,
    networks: Vec<IpNetwork>,
}

impl TrustedProxies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.addresses.push(address);
        self
    }

    #[must_use]
    pub fn with_network(mut self, network: IpNetwork) -> Self {
        self.networks.push(network);
        self
    }

    #[must_use]
    pub fn is_trusted(&self, peer: IpAddr) -> bool {
        self.addresses.contains(&peer)
            || self.networks.iter().any(|network| network.contains(peer))
    }
}

/// Resolve the identity key for a request.
///
/// Pure function of the request metadata plus the trusted-proxy
/// configuration; no lookups, no side effects.
#[must_use]
pub fn resolve_identity(
    subject: Option<Uuid>,
    peer: IpAddr,
    forwarded_for: Option<&str>,
    proxies: &TrustedProxies,
) -> ClientIdentity {
    if let Some(id) = subject {
        return ClientIdentity::User(id);
    }
    ClientIdentity::Ip(client_ip(peer, forwarded_for, proxies))
}

/// Pick the client address: first forwarded entry when the peer is a
/// trusted proxy, the peer itself otherwise.
fn client_ip(peer: IpAddr, forwarded_for: Option<&str>, proxies: &TrustedProxies) -> IpAddr {
    if !proxies.is_trusted(peer) {
        return peer;
    }
    let Some(first) = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return peer;
    };
    sanitize_ip(first).unwrap_or(SENTINEL_ADDR)
}

/// Strip everything outside the IPv4/IPv6 charset, then require a strict
/// parse. Header content is attacker-controlled; nothing partial survives.
fn sanitize_ip(raw: &str) -> Option<IpAddr> {
    let stripped = Regex::new(r"[^0-9a-fA-F:.]")
        .map(|pattern| pattern.replace_all(raw, "").into_owned())
        .unwrap_or_default();
    stripped.parse::<IpAddr>().ok()
}

#[cfg(test)]
mod tests {
    use super::{ClientIdentity, SENTINEL_ADDR, TrustedProxies, resolve_identity, sanitize_ip};
    use anyhow::Result;
    use std::net::IpAddr;
    use uuid::Uuid;

    fn addr(value: &str) -> Result<IpAddr> {
        Ok(value.parse()?)
    }

    #[test]
    fn subject_wins_over_forwarded_headers() -> Result<()> {
        let id = Uuid::new_v4();
        let proxies = TrustedProxies::new().with_address(addr("10.0.0.1")?);
        let identity = resolve_identity(Some(id), addr("10.0.0.1")?, Some("1.2.3.4"), &proxies);
        assert_eq!(identity, ClientIdentity::User(id));
        assert_eq!(identity.key(), format!("user:{id}"));
        Ok(())
    }

    #[test]
    fn untrusted_peer_ignores_forwarded_for() -> Result<()> {
        let proxies = TrustedProxies::new();
        let identity = resolve_identity(None, addr("203.0.113.9")?, Some("1.2.3.4"), &proxies);
        assert_eq!(identity, ClientIdentity::Ip(addr("203.0.113.9")?));
        Ok(())
    }

    #[test]
    fn trusted_peer_takes_first_forwarded_entry() -> Result<()> {
        let proxies = TrustedProxies::new().with_address(addr("10.0.0.1")?);
        let identity = resolve_identity(
            None,
            addr("10.0.0.1")?,
            Some("198.51.100.7, 10.0.0.1"),
            &proxies,
        );
        assert_eq!(identity, ClientIdentity::Ip(addr("198.51.100.7")?));
        Ok(())
    }

    #[test]
    fn cidr_block_trusts_whole_range() -> Result<()> {
        let proxies = TrustedProxies::new().with_network("10.1.0.0/16".parse()?);
        assert!(proxies.is_trusted(addr("10.1.44.2")?));
        assert!(!proxies.is_trusted(addr("10.2.0.1")?));
        Ok(())
    }

    #[test]
    fn trusted_peer_missing_header_keys_on_peer() -> Result<()> {
        let proxies = TrustedProxies::new().with_address(addr("10.0.0.1")?);
        let identity = resolve_identity(None, addr("10.0.0.1")?, None, &proxies);
        assert_eq!(identity, ClientIdentity::Ip(addr("10.0.0.1")?));
        Ok(())
    }

    #[test]
    fn malformed_forwarded_entry_falls_back_to_sentinel() -> Result<()> {
        let proxies = TrustedProxies::new().with_address(addr("10.0.0.1")?);
        let identity = resolve_identity(None, addr("10.0.0.1")?, Some("not-an-ip"), &proxies);
        assert_eq!(identity, ClientIdentity::Ip(SENTINEL_ADDR));
        Ok(())
    }

    #[test]
    fn sanitize_strips_control_characters() -> Result<()> {
        assert_eq!(sanitize_ip("1.2.3.4\r\n"), Some(addr("1.2.3.4")?));
        assert_eq!(sanitize_ip("::1 "), Some(addr("::1")?));
        Ok(())
    }

    #[test]
    fn sanitize_rejects_garbage() {
        assert_eq!(sanitize_ip("zz..::"), None);
        assert_eq!(sanitize_ip(""), None);
        // Stripping must not rescue an address that was never valid.
        assert_eq!(sanitize_ip("999.1.1.1"), None);
    }

    #[test]
    fn ipv6_addresses_survive_sanitizing() -> Result<()> {
        assert_eq!(
            sanitize_ip("2001:db8::8a2e:370:7334"),
            Some(addr("2001:db8::8a2e:370:7334")?)
        );
        Ok(())
    }
}
