//! The link-layer address entry carried by every interface.

use crate::{InterfaceName, NetAddress};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A link-layer address record: the interface's name label, its index
/// in the interface table, and the raw hardware address bytes.
///
/// This mirrors the classic `sockaddr_dl` layout: the record embeds a
/// copy of the interface name so consumers holding only the address can
/// still identify the interface. The label is rewritten in place on
/// rename and the index is renumbered when the interface moves between
/// stacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAddress {
    name: InterfaceName,
    index: u32,
    addr: Vec<u8>,
}

impl LinkAddress {
    /// Creates a link-layer address record.
    pub fn new(name: InterfaceName, index: u32, addr: Vec<u8>) -> Self {
        LinkAddress { name, index, addr }
    }

    /// The embedded interface name label.
    pub fn name(&self) -> &InterfaceName {
        &self.name
    }

    /// The interface index this record was stamped with.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The raw hardware address bytes.
    pub fn addr(&self) -> &[u8] {
        &self.addr
    }

    /// Hardware address length in bytes.
    pub fn addr_len(&self) -> usize {
        self.addr.len()
    }

    /// Rewrites the embedded name label, leaving address and index
    /// untouched.
    pub fn set_name(&mut self, name: InterfaceName) {
        self.name = name;
    }

    /// Renumbers the embedded index.
    pub fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    /// Replaces the hardware address bytes.
    pub fn set_addr(&mut self, addr: Vec<u8>) {
        self.addr = addr;
    }

    /// The hardware address as a [`NetAddress`].
    pub fn to_net(&self) -> NetAddress {
        NetAddress::Link(self.addr.clone())
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}/{}", self.name, self.index, self.to_net())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> LinkAddress {
        LinkAddress::new(
            "eth0".parse().unwrap(),
            3,
            vec![0x02, 0x00, 0x00, 0xaa, 0xbb, 0x01],
        )
    }

    #[test]
    fn test_accessors() {
        let lla = sample();
        assert_eq!(lla.name(), &"eth0".parse::<InterfaceName>().unwrap());
        assert_eq!(lla.index(), 3);
        assert_eq!(lla.addr_len(), 6);
    }

    #[test]
    fn test_rename_in_place() {
        let mut lla = sample();
        lla.set_name("wan0".parse().unwrap());
        assert_eq!(lla.name().as_str(), "wan0");
        // Address and index survive a rename.
        assert_eq!(lla.index(), 3);
        assert_eq!(lla.addr(), &[0x02, 0x00, 0x00, 0xaa, 0xbb, 0x01]);
    }

    #[test]
    fn test_to_net() {
        let lla = sample();
        assert_eq!(
            lla.to_net(),
            NetAddress::Link(vec![0x02, 0x00, 0x00, 0xaa, 0xbb, 0x01])
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(sample().to_string(), "eth0#3/02:00:00:aa:bb:01");
    }
}
