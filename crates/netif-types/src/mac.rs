//! MAC address type with safe parsing and formatting.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit hardware (MAC) address.
///
/// # Examples
///
/// ```
/// use netif_types::MacAddress;
///
/// let mac: MacAddress = "02:00:00:aa:bb:01".parse().unwrap();
/// assert!(mac.is_local());
/// assert_eq!(mac.to_string(), "02:00:00:aa:bb:01");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The broadcast address (ff:ff:ff:ff:ff:ff).
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// The all-zero address.
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    /// Creates a MAC address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns the 24-bit organizationally unique identifier.
    pub const fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// Returns true if the group bit (LSB of the first octet) is set.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Returns true if this is a unicast address.
    pub const fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    /// Returns true if the locally-administered bit is set.
    pub const fn is_local(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// Returns true if this is the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    /// Returns true if this is the all-zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains('-') { '-' } else { ':' };
        let mut bytes = [0u8; 6];
        let mut n = 0;
        for part in s.split(separator) {
            if n == 6 || part.len() != 2 {
                return Err(ParseError::InvalidMacAddress(s.to_string()));
            }
            bytes[n] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::InvalidMacAddress(s.to_string()))?;
            n += 1;
        }
        if n != 6 {
            return Err(ParseError::InvalidMacAddress(s.to_string()));
        }
        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

impl From<MacAddress> for [u8; 6] {
    fn from(mac: MacAddress) -> [u8; 6] {
        mac.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_and_display() {
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(mac.to_string(), "00:11:22:33:44:55");
    }

    #[test]
    fn test_parse_hyphen_format() {
        let mac: MacAddress = "00-11-22-33-44-55".parse().unwrap();
        assert_eq!(mac, "00:11:22:33:44:55".parse().unwrap());
    }

    #[test]
    fn test_oui() {
        let mac = MacAddress::new([0xaa, 0xbb, 0xcc, 0x01, 0x02, 0x03]);
        assert_eq!(mac.oui(), [0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn test_multicast_and_broadcast() {
        let multicast: MacAddress = "01:00:5e:00:00:01".parse().unwrap();
        assert!(multicast.is_multicast());
        assert!(!multicast.is_broadcast());
        assert!(MacAddress::BROADCAST.is_broadcast());
        assert!(MacAddress::BROADCAST.is_multicast());
        assert!(MacAddress::ZERO.is_zero());
    }

    #[test]
    fn test_local_bit() {
        let local: MacAddress = "02:00:00:00:00:01".parse().unwrap();
        assert!(local.is_local());
        let universal: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        assert!(!universal.is_local());
    }

    #[test]
    fn test_invalid_format() {
        assert!("bogus".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<MacAddress>().is_err());
        assert!("zz:11:22:33:44:55".parse::<MacAddress>().is_err());
        assert!("0:11:22:33:44:55".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let mac: MacAddress = "0a:0b:0c:0d:0e:0f".parse().unwrap();
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"0a:0b:0c:0d:0e:0f\"");
        let back: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }
}
