//! Per-interface protocol addresses.
//!
//! Every interface carries an ordered address list whose first entry
//! is the link-layer address, created with the interface and removed
//! only in the final stage of detach. Protocol addresses follow.
//! Entries are `Arc`-counted: whatever is handed out stays valid after
//! removal from the list until the holder drops it.

use crate::error::{NetifError, Result};
use crate::iface::{IfFlags, Interface};
use netif_types::{AddressFamily, InterfaceName, LinkAddress, NetAddress};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Role of an address owned by a redundancy protocol (CARP/VRRP
/// style). Addresses without a role are "real" interface addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedundancyRole {
    /// This node currently answers for the address.
    Master,
    /// Another node answers; this entry is standby.
    Backup,
}

enum EntryKind {
    Link(RwLock<LinkAddress>),
    Proto {
        addr: NetAddress,
        netmask: Option<NetAddress>,
        /// Broadcast address on broadcast interfaces, peer address on
        /// point-to-point interfaces.
        dst: Option<NetAddress>,
        redundancy: Option<RedundancyRole>,
    },
}

/// One address bound to an interface.
pub struct AddressEntry {
    iface: Weak<Interface>,
    kind: EntryKind,
}

impl AddressEntry {
    pub(crate) fn link(iface: &Arc<Interface>, lla: LinkAddress) -> Arc<AddressEntry> {
        Arc::new(AddressEntry {
            iface: Arc::downgrade(iface),
            kind: EntryKind::Link(RwLock::new(lla)),
        })
    }

    pub(crate) fn proto(
        iface: &Arc<Interface>,
        addr: NetAddress,
        netmask: Option<NetAddress>,
        dst: Option<NetAddress>,
        redundancy: Option<RedundancyRole>,
    ) -> Arc<AddressEntry> {
        Arc::new(AddressEntry {
            iface: Arc::downgrade(iface),
            kind: EntryKind::Proto {
                addr,
                netmask,
                dst,
                redundancy,
            },
        })
    }

    /// The owning interface, while it is still alive. The back-link is
    /// non-owning; a detached interface whose last handle went away
    /// reads as `None`.
    pub fn interface(&self) -> Option<Arc<Interface>> {
        self.iface.upgrade()
    }

    /// The address itself.
    pub fn addr(&self) -> NetAddress {
        match &self.kind {
            EntryKind::Link(lla) => lla.read().to_net(),
            EntryKind::Proto { addr, .. } => addr.clone(),
        }
    }

    pub fn family(&self) -> AddressFamily {
        match &self.kind {
            EntryKind::Link(_) => AddressFamily::Link,
            EntryKind::Proto { addr, .. } => addr.family(),
        }
    }

    pub fn netmask(&self) -> Option<NetAddress> {
        match &self.kind {
            EntryKind::Link(_) => None,
            EntryKind::Proto { netmask, .. } => netmask.clone(),
        }
    }

    /// Destination/broadcast companion address, if any.
    pub fn dst_addr(&self) -> Option<NetAddress> {
        match &self.kind {
            EntryKind::Link(_) => None,
            EntryKind::Proto { dst, .. } => dst.clone(),
        }
    }

    /// True for the link-layer entry.
    pub fn is_link(&self) -> bool {
        matches!(self.kind, EntryKind::Link(_))
    }

    /// Snapshot of the link-layer record, for the link entry.
    pub fn link_addr(&self) -> Option<LinkAddress> {
        match &self.kind {
            EntryKind::Link(lla) => Some(lla.read().clone()),
            EntryKind::Proto { .. } => None,
        }
    }

    pub(crate) fn set_link_name(&self, name: InterfaceName) {
        if let EntryKind::Link(lla) = &self.kind {
            lla.write().set_name(name);
        }
    }

    pub(crate) fn set_link_index(&self, index: u32) {
        if let EntryKind::Link(lla) = &self.kind {
            lla.write().set_index(index);
        }
    }

    /// True for addresses owned by a redundancy protocol.
    pub fn is_redundant(&self) -> bool {
        matches!(
            self.kind,
            EntryKind::Proto {
                redundancy: Some(_),
                ..
            }
        )
    }

    /// True for a redundancy-protocol address whose election is
    /// currently master.
    pub fn is_redundant_master(&self) -> bool {
        matches!(
            self.kind,
            EntryKind::Proto {
                redundancy: Some(RedundancyRole::Master),
                ..
            }
        )
    }

    /// Whether `next` should replace `cur` in a best-match scan, on
    /// virtual status alone:
    /// 1) a non-virtual entry is preferred over a virtual one;
    /// 2) a virtual entry in master state is preferred over a virtual
    ///    one that is not.
    pub(crate) fn preferred(cur: &AddressEntry, next: &AddressEntry) -> bool {
        cur.is_redundant()
            && (!next.is_redundant()
                || (next.is_redundant_master() && !cur.is_redundant_master()))
    }
}

impl std::fmt::Debug for AddressEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressEntry")
            .field("addr", &self.addr())
            .field("netmask", &self.netmask())
            .field("dst", &self.dst_addr())
            .field("link", &self.is_link())
            .finish()
    }
}

impl Interface {
    /// Binds a protocol address to this interface.
    ///
    /// `dst` is the broadcast address on broadcast interfaces and the
    /// peer address on point-to-point interfaces. Pass a
    /// [`RedundancyRole`] for addresses owned by a redundancy
    /// protocol.
    pub fn add_address(
        self: &Arc<Self>,
        addr: NetAddress,
        netmask: Option<NetAddress>,
        dst: Option<NetAddress>,
        redundancy: Option<RedundancyRole>,
    ) -> Result<Arc<AddressEntry>> {
        if addr.family() == AddressFamily::Link {
            return Err(NetifError::Driver(
                "link-layer addresses are bound at attach".into(),
            ));
        }
        let entry = AddressEntry::proto(self, addr, netmask, dst, redundancy);
        let mut inner = self.inner().write();
        // Checked under the lock so an add racing detach cannot land
        // an entry after the purge.
        if self.is_dying() {
            return Err(NetifError::Dying(inner.name.to_string()));
        }
        inner.addrs.push(entry.clone());
        Ok(entry)
    }

    /// Unbinds a protocol address. The link-layer entry cannot be
    /// removed this way.
    pub fn remove_address(&self, addr: &NetAddress) -> Result<Arc<AddressEntry>> {
        let mut inner = self.inner().write();
        let pos = inner
            .addrs
            .iter()
            .position(|e| !e.is_link() && e.addr() == *addr)
            .ok_or_else(|| NetifError::NotFound(addr.to_string()))?;
        Ok(inner.addrs.remove(pos))
    }

    /// Removes and returns every non-link address. Used by detach;
    /// per-family teardown runs on the returned entries after the lock
    /// is released.
    pub(crate) fn take_proto_addrs(&self) -> Vec<Arc<AddressEntry>> {
        let mut inner = self.inner().write();
        let mut taken = Vec::new();
        inner.addrs.retain(|e| {
            if e.is_link() {
                true
            } else {
                taken.push(e.clone());
                false
            }
        });
        taken
    }

    /// Drops the link-layer entry. Final step of detach.
    pub(crate) fn drop_link_addr(&self) {
        let mut inner = self.inner().write();
        inner.addrs.retain(|e| !e.is_link());
    }

    /// Best address on this interface for talking to `addr`: exact or
    /// destination matches win, otherwise the first prefix match,
    /// otherwise the first address of the family.
    pub fn addr_for(&self, addr: &NetAddress) -> Option<Arc<AddressEntry>> {
        let inner = self.inner().read();
        let p2p = self.flags().contains(IfFlags::POINTOPOINT);
        let mut fallback: Option<&Arc<AddressEntry>> = None;
        for entry in inner.addrs.iter().filter(|e| !e.is_link()) {
            if entry.family() != addr.family() {
                continue;
            }
            if fallback.is_none() {
                fallback = Some(entry);
            }
            match entry.netmask() {
                None => {
                    if entry.addr() == *addr
                        || entry.dst_addr().is_some_and(|d| d == *addr)
                    {
                        return Some(entry.clone());
                    }
                }
                Some(mask) => {
                    if p2p {
                        if entry.dst_addr().is_some_and(|d| d == *addr) {
                            return Some(entry.clone());
                        }
                    } else if entry.addr().masked_matches(addr, &mask) {
                        return Some(entry.clone());
                    }
                }
            }
        }
        fallback.cloned()
    }
}
