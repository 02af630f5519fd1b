//! POOL endpoint addresses and their resolution from text.
//!
//! The driver takes peers as a 16-byte address plus a port. IPv4 peers are
//! carried in their v4-mapped form (`::ffff:a.b.c.d`), so [`Addr`] stores
//! every address that way and only unmaps it for display.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use crate::core::constants::{NETWORK_DUAL, NETWORK_V4, NETWORK_V6};
use crate::core::{Error, Result};

/// Where `/etc/services` lives.
const SERVICES_PATH: &str = "/etc/services";

/// Used when `/etc/services` is missing or lacks the entry.
const FALLBACK_SERVICES: &[(&str, u16)] = &[
    ("ftp", 21),
    ("ssh", 22),
    ("telnet", 23),
    ("smtp", 25),
    ("domain", 53),
    ("http", 80),
    ("www", 80),
    ("pop3", 110),
    ("imap", 143),
    ("https", 443),
];

/// Address family accepted by a network token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// `pool`: IPv4 or IPv6.
    Any,
    /// `pool4`: IPv4 only.
    V4,
    /// `pool6`: IPv6 only.
    V6,
}

impl Family {
    /// Parse a network token.
    pub fn from_network(network: &str) -> Result<Self> {
        match network {
            NETWORK_DUAL => Ok(Family::Any),
            NETWORK_V4 => Ok(Family::V4),
            NETWORK_V6 => Ok(Family::V6),
            other => Err(Error::UnsupportedNetwork(other.to_string())),
        }
    }

    /// Whether `ip` belongs to this family.
    pub fn admits(self, ip: &IpAddr) -> bool {
        match self {
            Family::Any => true,
            Family::V4 => ip.is_ipv4(),
            Family::V6 => ip.is_ipv6(),
        }
    }
}

/// A POOL endpoint address.
///
/// Immutable once built. IPv4 addresses are normalized to v4-mapped IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addr {
    ip: Ipv6Addr,
    port: u16,
}

impl Addr {
    /// Create an address, mapping IPv4 into IPv6.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        let ip = match ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        Self { ip, port }
    }

    /// Build from the raw 16-byte form used in driver structures.
    pub fn from_octets(octets: [u8; 16], port: u16) -> Self {
        Self {
            ip: Ipv6Addr::from(octets),
            port,
        }
    }

    /// The wildcard address of a family.
    ///
    /// Dual-stack and IPv6 binds use `::`, IPv4 binds use `0.0.0.0`.
    pub fn unspecified(family: Family, port: u16) -> Self {
        match family {
            Family::V4 => Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            Family::Any | Family::V6 => Self::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
        }
    }

    /// The IP address, unmapped back to IPv4 where applicable.
    pub fn ip(&self) -> IpAddr {
        match self.ip.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(self.ip),
        }
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The 16-byte form handed to the driver.
    pub fn octets(&self) -> [u8; 16] {
        self.ip.octets()
    }

    /// Whether this is an IPv4 peer.
    pub fn is_ipv4(&self) -> bool {
        self.ip.to_ipv4_mapped().is_some()
    }

    /// `AF_INET` or `AF_INET6`, as the driver expects it.
    pub fn family(&self) -> u8 {
        if self.is_ipv4() {
            libc::AF_INET as u8
        } else {
            libc::AF_INET6 as u8
        }
    }

    /// Network name reported for every POOL address.
    pub fn network(&self) -> &'static str {
        NETWORK_DUAL
    }

    /// The equivalent socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip(), self.port)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SocketAddr brackets IPv6 hosts.
        fmt::Display::fmt(&self.socket_addr(), f)
    }
}

impl From<SocketAddr> for Addr {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl From<Addr> for SocketAddr {
    fn from(addr: Addr) -> Self {
        addr.socket_addr()
    }
}

impl FromStr for Addr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        resolve(NETWORK_DUAL, s)
    }
}

/// Resolve `address` on `network` into an [`Addr`].
///
/// `network` is `pool`, `pool4` or `pool6`. `address` is `host:port`, with
/// IPv6 hosts in brackets; `:port` resolves to the wildcard address of the
/// family. Hostnames go through the system resolver and the first address of
/// the requested family wins. Ports may be numeric or service names.
pub fn resolve(network: &str, address: &str) -> Result<Addr> {
    let family = Family::from_network(network)?;
    let (host, port) = split_host_port(address)?;
    let port = lookup_port(port).map_err(|reason| invalid(address, reason))?;

    if host.is_empty() {
        return Ok(Addr::unspecified(family, port));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if !family.admits(&ip) {
            return Err(invalid(address, format!("{ip} is not usable on {network}")));
        }
        return Ok(Addr::new(ip, port));
    }

    let candidates = (host, port).to_socket_addrs().map_err(|source| Error::Resolve {
        host: host.to_string(),
        source,
    })?;

    candidates
        .map(|sa| sa.ip())
        .find(|ip| family.admits(ip))
        .map(|ip| Addr::new(ip, port))
        .ok_or_else(|| Error::Resolve {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        })
}

fn invalid(address: &str, reason: impl Into<String>) -> Error {
    Error::InvalidAddress {
        address: address.to_string(),
        reason: reason.into(),
    }
}

/// Split `host:port`, `[v6]:port` or `:port`.
fn split_host_port(address: &str) -> Result<(&str, &str)> {
    if let Some(rest) = address.strip_prefix('[') {
        let Some((host, tail)) = rest.split_once(']') else {
            return Err(invalid(address, "missing ']'"));
        };
        return match tail.strip_prefix(':') {
            Some(port) => Ok((host, port)),
            None if tail.is_empty() => Err(invalid(address, "missing port")),
            None => Err(invalid(address, "unexpected text after ']'")),
        };
    }

    let Some((host, port)) = address.rsplit_once(':') else {
        return Err(invalid(address, "missing port"));
    };
    if host.contains(':') {
        return Err(invalid(address, "too many colons"));
    }
    if host.contains('[') || host.contains(']') {
        return Err(invalid(address, "unexpected bracket"));
    }
    Ok((host, port))
}

/// Numeric port or tcp service name. An empty port means 0.
fn lookup_port(service: &str) -> std::result::Result<u16, String> {
    if service.is_empty() {
        return Ok(0);
    }
    if service.bytes().all(|b| b.is_ascii_digit()) {
        return service
            .parse::<u16>()
            .map_err(|_| format!("port {service} out of range"));
    }

    let name = service.to_ascii_lowercase();
    if let Ok(table) = std::fs::read_to_string(SERVICES_PATH) {
        if let Some(port) = find_service(&table, &name) {
            return Ok(port);
        }
    }
    FALLBACK_SERVICES
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, port)| *port)
        .ok_or_else(|| format!("unknown port {service}"))
}

/// Look up a tcp service in `/etc/services` syntax.
fn find_service(table: &str, name: &str) -> Option<u16> {
    for line in table.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        let (Some(service), Some(spec)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some((port, proto)) = spec.split_once('/') else {
            continue;
        };
        if proto != "tcp" {
            continue;
        }
        let matches = service.eq_ignore_ascii_case(name)
            || fields.any(|alias| alias.eq_ignore_ascii_case(name));
        if matches {
            if let Ok(port) = port.parse() {
                return Some(port);
            }
        }
    }
    None
}
