use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::net::SocketAddr as UnixSocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("failed to parse {candidate:?} as a peer address: {reason}")]
pub struct AddressParseError {
    pub(crate) candidate: String,
    pub(crate) reason: String,
}

impl AddressParseError {
    fn new(candidate: &str, reason: impl Into<String>) -> Self {
        Self {
            candidate: candidate.to_string(),
            reason: reason.into(),
        }
    }
}

impl PartialEq for AddressParseError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string().eq(&other.to_string())
    }
}

/// A connection endpoint as reported by the host in `link-connect` and
/// `connect` payloads.
///
/// Anything containing a `/` is a unix domain socket path. Everything
/// else is `host:port`, with bracketed IPv6 accepted; a bare host parses
/// with port 0. Hostnames that are not address literals are kept verbatim
/// in [`PeerAddress::Named`], no resolution is attempted.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PeerAddress {
    UnixDomain(Box<UnixSocketAddr>),
    V4(SocketAddrV4),
    V6(SocketAddrV6),
    Named { host: String, port: u16 },
}

impl PeerAddress {
    /// Returns the ip representation of the address
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Self::UnixDomain(_) | Self::Named { .. } => None,
            Self::V4(a) => Some((*a.ip()).into()),
            Self::V6(a) => Some((*a.ip()).into()),
        }
    }

    /// Returns the unix domain socket path of the address
    pub fn unix(&self) -> Option<&Path> {
        match self {
            Self::UnixDomain(unix) => unix.as_pathname(),
            Self::V4(_) | Self::V6(_) | Self::Named { .. } => None,
        }
    }

    /// Returns the port number. A bare host parses with port 0.
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::UnixDomain(_) => None,
            Self::V4(a) => Some(a.port()),
            Self::V6(a) => Some(a.port()),
            Self::Named { port, .. } => Some(*port),
        }
    }

    fn from_ip(ip: IpAddr, port: u16) -> Self {
        match ip {
            IpAddr::V4(a) => Self::V4(SocketAddrV4::new(a, port)),
            IpAddr::V6(a) => Self::V6(SocketAddrV6::new(a, port, 0, 0)),
        }
    }

    fn from_host(host: &str, port: u16, candidate: &str) -> Result<Self, AddressParseError> {
        if host.is_empty() {
            return Err(AddressParseError::new(candidate, "empty host"));
        }
        match host.parse::<IpAddr>() {
            Ok(ip) => Ok(Self::from_ip(ip, port)),
            Err(_) => Ok(Self::Named {
                host: host.to_string(),
                port,
            }),
        }
    }
}

impl FromStr for PeerAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('/') {
            return UnixSocketAddr::from_pathname(s)
                .map(|unix| Self::UnixDomain(unix.into()))
                .map_err(|err| AddressParseError::new(s, err.to_string()));
        }
        // a bare address literal carries no port
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self::from_ip(ip, 0));
        }
        if let Some(rest) = s.strip_prefix('[') {
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| AddressParseError::new(s, "unterminated bracket"))?;
            let ip: IpAddr = host
                .parse()
                .map_err(|_| AddressParseError::new(s, "bracketed host is not an ip address"))?;
            let port = match rest.strip_prefix(':') {
                None if rest.is_empty() => 0,
                None => return Err(AddressParseError::new(s, "junk after bracket")),
                Some(port) => port
                    .parse()
                    .map_err(|_| AddressParseError::new(s, "invalid port"))?,
            };
            return Ok(Self::from_ip(ip, port));
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| AddressParseError::new(s, "invalid port"))?;
                Self::from_host(host, port, s)
            }
            None => Self::from_host(s, 0, s),
        }
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::UnixDomain(unix) => match unix.as_pathname() {
                Some(path) => path.display().fmt(fmt),
                None => write!(fmt, "<unbound unix domain>"),
            },
            Self::V4(a) => a.fmt(fmt),
            Self::V6(a) => a.fmt(fmt),
            Self::Named { host, port } => write!(fmt, "{host}:{port}"),
        }
    }
}

impl std::fmt::Debug for PeerAddress {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, fmt)
    }
}

impl PartialEq for PeerAddress {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::UnixDomain(a), Self::UnixDomain(b)) => {
                match (a.as_pathname(), b.as_pathname()) {
                    (Some(a), Some(b)) => a.eq(b),
                    (None, None) => true,
                    _ => false,
                }
            }
            (Self::V4(a), Self::V4(b)) => a.eq(b),
            (Self::V6(a), Self::V6(b)) => a.eq(b),
            (
                Self::Named { host, port },
                Self::Named {
                    host: other_host,
                    port: other_port,
                },
            ) => host.eq(other_host) && port.eq(other_port),
            _ => false,
        }
    }
}

impl Eq for PeerAddress {}

impl TryFrom<String> for PeerAddress {
    type Error = AddressParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

impl From<PeerAddress> for String {
    fn from(a: PeerAddress) -> String {
        format!("{a}")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn parses_unix_paths() {
        let addr = "/var/run/smtpd.sock".parse::<PeerAddress>().unwrap();
        assert_eq!(addr.unix(), Some(Path::new("/var/run/smtpd.sock")));
        assert_eq!(addr.to_string(), "/var/run/smtpd.sock");
        assert_eq!(addr.port(), None);
    }

    #[test]
    fn parses_inet_addresses() {
        assert_eq!(
            "10.0.0.1:25".parse::<PeerAddress>(),
            Ok(PeerAddress::V4(SocketAddrV4::new(
                Ipv4Addr::new(10, 0, 0, 1),
                25
            )))
        );
        assert_eq!(
            "[::1]:587".parse::<PeerAddress>(),
            Ok(PeerAddress::V6(SocketAddrV6::new(
                Ipv6Addr::LOCALHOST,
                587,
                0,
                0
            )))
        );
        // a bare host parses with port 0
        assert_eq!(
            "10.0.0.1".parse::<PeerAddress>(),
            Ok(PeerAddress::V4(SocketAddrV4::new(
                Ipv4Addr::new(10, 0, 0, 1),
                0
            )))
        );
        assert_eq!(
            "::1".parse::<PeerAddress>(),
            Ok(PeerAddress::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 0, 0, 0)))
        );
    }

    #[test]
    fn keeps_hostnames_verbatim() {
        assert_eq!(
            "mx1.example.com:465".parse::<PeerAddress>(),
            Ok(PeerAddress::Named {
                host: "mx1.example.com".to_string(),
                port: 465,
            })
        );
        assert_eq!(
            "localhost".parse::<PeerAddress>(),
            Ok(PeerAddress::Named {
                host: "localhost".to_string(),
                port: 0,
            })
        );
    }

    #[test]
    fn rejects_malformed_addresses() {
        k9::assert_equal!(
            "10.0.0.1:bogus".parse::<PeerAddress>().unwrap_err().to_string(),
            "failed to parse \"10.0.0.1:bogus\" as a peer address: invalid port"
        );
        assert!("".parse::<PeerAddress>().is_err());
        assert!(":25".parse::<PeerAddress>().is_err());
        assert!("[::1".parse::<PeerAddress>().is_err());
        assert!("[::1]junk".parse::<PeerAddress>().is_err());
    }
}
