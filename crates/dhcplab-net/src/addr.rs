//! Link-layer and host addressing types.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::NetError;

/// Prefix length assumed when a host address carries none.
pub const DEFAULT_PREFIX_LEN: u8 = 8;

/// A 48-bit Ethernet MAC address, rendered as `ea:e9:78:fb:fd:01`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| NetError::InvalidMac(s.into()))?;
            if part.len() != 2 {
                return Err(NetError::InvalidMac(s.into()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| NetError::InvalidMac(s.into()))?;
        }
        if parts.next().is_some() {
            return Err(NetError::InvalidMac(s.into()));
        }
        Ok(MacAddr(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// An IPv4 interface address with prefix length, e.g. `10.1.11.3/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostAddr {
    pub ip: Ipv4Addr,
    pub prefix_len: u8,
}

impl HostAddr {
    /// Parses a host address such as `10.1.11.3/24`.
    ///
    /// `0.0.0.0` (with or without prefix) and the empty string mean the host
    /// is left unaddressed and yield `None`. A missing prefix length defaults
    /// to [`DEFAULT_PREFIX_LEN`].
    pub fn parse_optional(s: &str) -> Result<Option<Self>, NetError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        let addr: HostAddr = s.parse()?;
        if addr.ip.is_unspecified() {
            Ok(None)
        } else {
            Ok(Some(addr))
        }
    }
}

impl FromStr for HostAddr {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, prefix) = match s.split_once('/') {
            Some((ip, prefix)) => (ip, Some(prefix)),
            None => (s, None),
        };
        let ip: Ipv4Addr = ip
            .trim()
            .parse()
            .map_err(|_| NetError::InvalidAddress(s.into()))?;
        let prefix_len = match prefix {
            Some(p) => p
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|len| *len <= 32)
                .ok_or_else(|| NetError::InvalidAddress(s.into()))?,
            None => DEFAULT_PREFIX_LEN,
        };
        Ok(HostAddr { ip, prefix_len })
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len)
    }
}
