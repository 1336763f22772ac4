//! Protocol and link-layer address representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Address family tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    /// Link-layer (hardware) addresses.
    Link,
    /// IPv4.
    Inet,
    /// IPv6.
    Inet6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Link => write!(f, "link"),
            AddressFamily::Inet => write!(f, "inet"),
            AddressFamily::Inet6 => write!(f, "inet6"),
        }
    }
}

/// A network address of any supported family.
///
/// Link-layer addresses carry raw hardware bytes; two link addresses
/// compare equal when their bytes are equal, regardless of where they
/// came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetAddress {
    /// Raw link-layer (hardware) address bytes.
    Link(Vec<u8>),
    /// IPv4 address.
    Inet(Ipv4Addr),
    /// IPv6 address.
    Inet6(Ipv6Addr),
}

impl NetAddress {
    /// Returns the family of this address.
    pub fn family(&self) -> AddressFamily {
        match self {
            NetAddress::Link(_) => AddressFamily::Link,
            NetAddress::Inet(_) => AddressFamily::Inet,
            NetAddress::Inet6(_) => AddressFamily::Inet6,
        }
    }

    /// Returns the address as raw bytes.
    pub fn octets(&self) -> Vec<u8> {
        match self {
            NetAddress::Link(bytes) => bytes.clone(),
            NetAddress::Inet(ip) => ip.octets().to_vec(),
            NetAddress::Inet6(ip) => ip.octets().to_vec(),
        }
    }

    /// Returns true if `self` and `other` agree on every bit covered by
    /// `mask`. All three must be of the same family; a family mismatch
    /// never matches.
    ///
    /// This is the byte-at-a-time prefix comparison used for routing
    /// style "is this address on this network" checks.
    pub fn masked_matches(&self, other: &NetAddress, mask: &NetAddress) -> bool {
        if self.family() != other.family() || self.family() != mask.family() {
            return false;
        }
        let a = self.octets();
        let b = other.octets();
        let m = mask.octets();
        if a.len() != b.len() {
            return false;
        }
        // Mask may be shorter than the address; uncovered trailing
        // bytes are treated as wildcards.
        a.iter()
            .zip(b.iter())
            .zip(m.iter())
            .all(|((x, y), bit)| (x ^ y) & bit == 0)
    }

    /// Returns true if `self`, interpreted as a netmask, is strictly
    /// more specific than `other`: it covers every bit `other` covers
    /// plus at least one more.
    pub fn mask_refines(&self, other: &NetAddress) -> bool {
        if self.family() != other.family() {
            return false;
        }
        let a = self.octets();
        let b = other.octets();
        if a.len() != b.len() {
            return false;
        }
        let covers = a.iter().zip(b.iter()).all(|(x, y)| x & y == *y);
        covers && a != b
    }

    /// Returns true if this is a multicast address in its family.
    pub fn is_multicast(&self) -> bool {
        match self {
            NetAddress::Link(bytes) => bytes.first().is_some_and(|b| b & 0x01 != 0),
            NetAddress::Inet(ip) => ip.is_multicast(),
            NetAddress::Inet6(ip) => ip.is_multicast(),
        }
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetAddress::Link(bytes) => {
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ":")?;
                    }
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            NetAddress::Inet(ip) => write!(f, "{ip}"),
            NetAddress::Inet6(ip) => write!(f, "{ip}"),
        }
    }
}

impl From<Ipv4Addr> for NetAddress {
    fn from(ip: Ipv4Addr) -> Self {
        NetAddress::Inet(ip)
    }
}

impl From<Ipv6Addr> for NetAddress {
    fn from(ip: Ipv6Addr) -> Self {
        NetAddress::Inet6(ip)
    }
}

impl From<crate::MacAddress> for NetAddress {
    fn from(mac: crate::MacAddress) -> Self {
        NetAddress::Link(mac.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn v4(s: &str) -> NetAddress {
        NetAddress::Inet(s.parse().unwrap())
    }

    #[test]
    fn test_family() {
        assert_eq!(v4("10.0.0.1").family(), AddressFamily::Inet);
        assert_eq!(
            NetAddress::Inet6("::1".parse().unwrap()).family(),
            AddressFamily::Inet6
        );
        assert_eq!(NetAddress::Link(vec![0, 1]).family(), AddressFamily::Link);
    }

    #[test]
    fn test_masked_matches_same_net() {
        let a = v4("192.168.1.10");
        let b = v4("192.168.1.200");
        let mask = v4("255.255.255.0");
        assert!(a.masked_matches(&b, &mask));
    }

    #[test]
    fn test_masked_matches_different_net() {
        let a = v4("192.168.1.10");
        let b = v4("192.168.2.10");
        let mask = v4("255.255.255.0");
        assert!(!a.masked_matches(&b, &mask));
    }

    #[test]
    fn test_masked_matches_family_mismatch() {
        let a = v4("192.168.1.10");
        let b = NetAddress::Inet6("::1".parse().unwrap());
        let mask = v4("255.255.255.0");
        assert!(!a.masked_matches(&b, &mask));
    }

    #[test]
    fn test_mask_refines() {
        let narrow = v4("255.255.255.0");
        let wide = v4("255.255.0.0");
        assert!(narrow.mask_refines(&wide));
        assert!(!wide.mask_refines(&narrow));
        assert!(!narrow.mask_refines(&narrow));
    }

    #[test]
    fn test_is_multicast() {
        assert!(v4("224.0.0.1").is_multicast());
        assert!(!v4("10.0.0.1").is_multicast());
        assert!(NetAddress::Link(vec![0x01, 0x00, 0x5e, 0, 0, 1]).is_multicast());
        assert!(!NetAddress::Link(vec![0x02, 0, 0, 0, 0, 1]).is_multicast());
    }

    #[test]
    fn test_link_display() {
        let a = NetAddress::Link(vec![0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]);
        assert_eq!(a.to_string(), "01:00:5e:00:00:01");
    }
}
