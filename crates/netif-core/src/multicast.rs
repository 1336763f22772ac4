//! Per-interface multicast memberships.
//!
//! Each distinct group address on an interface has exactly one entry,
//! reference-counted across repeated joins. Protocol-level entries
//! whose driver maps them onto a link-layer group share a single
//! shadow entry for that link-layer address; the shadow's count is the
//! number of protocol entries riding on it. The driver is told about a
//! group exactly once, when its entry first appears, and once more
//! when the last reference goes away.

use crate::driver::IfRequest;
use crate::error::{NetifError, Result};
use crate::iface::{IfaceInner, Interface};
use log::warn;
use netif_types::{AddressFamily, NetAddress};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// One multicast membership on an interface.
pub struct MulticastEntry {
    iface: Weak<Interface>,
    addr: NetAddress,
    refcount: AtomicU32,
    /// Link-layer entry this protocol entry resolved onto.
    shadow: Option<Arc<MulticastEntry>>,
}

impl MulticastEntry {
    fn new(
        iface: &Arc<Interface>,
        addr: NetAddress,
        shadow: Option<Arc<MulticastEntry>>,
    ) -> Arc<MulticastEntry> {
        Arc::new(MulticastEntry {
            iface: Arc::downgrade(iface),
            addr,
            refcount: AtomicU32::new(1),
            shadow,
        })
    }

    pub fn addr(&self) -> NetAddress {
        self.addr.clone()
    }

    pub fn family(&self) -> AddressFamily {
        self.addr.family()
    }

    /// Number of joins outstanding against this entry. Zero once the
    /// membership has been dissolved; a kept handle stays readable.
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// The link-layer entry this one resolved onto, if the driver maps
    /// protocol groups to hardware groups.
    pub fn link_shadow(&self) -> Option<Arc<MulticastEntry>> {
        self.shadow.clone()
    }

    pub fn interface(&self) -> Option<Arc<Interface>> {
        self.iface.upgrade()
    }

    fn bump(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one reference; true when it was the last.
    fn release(&self) -> bool {
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn mark_dead(&self) {
        self.refcount.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for MulticastEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MulticastEntry")
            .field("addr", &self.addr)
            .field("refcount", &self.refcount())
            .field("shadow", &self.shadow.as_ref().map(|s| s.addr()))
            .finish()
    }
}

fn find(inner: &IfaceInner, addr: &NetAddress) -> Option<Arc<MulticastEntry>> {
    inner.multicast.iter().find(|e| e.addr == *addr).cloned()
}

fn unlink(inner: &mut IfaceInner, entry: &Arc<MulticastEntry>) {
    inner.multicast.retain(|e| !Arc::ptr_eq(e, entry));
}

impl Interface {
    /// Joins a multicast group.
    ///
    /// Re-joining a group the interface is already in only bumps the
    /// entry's reference count. A genuinely new protocol-level group is
    /// resolved to its link-layer companion through the driver, which
    /// is then notified once, after the interface lock is released.
    pub fn join_multicast(self: &Arc<Self>, addr: NetAddress) -> Result<Arc<MulticastEntry>> {
        if !addr.is_multicast() {
            return Err(NetifError::ResolveFailed(addr));
        }
        let ops = self.ops();
        let entry = {
            let mut inner = self.inner().write();
            // Checked under the lock so a join racing detach cannot
            // land an entry after the purge.
            if self.is_dying() {
                return Err(NetifError::Dying(inner.name.to_string()));
            }
            if let Some(existing) = find(&inner, &addr) {
                existing.bump();
                return Ok(existing);
            }
            let lladdr = match &ops.resolve_multicast {
                Some(resolve) => resolve(self, &addr)?,
                None => None,
            };
            let shadow = match lladdr {
                Some(ll) if ll != addr => Some(match find(&inner, &ll) {
                    Some(existing) => {
                        existing.bump();
                        existing
                    }
                    None => {
                        let shadow = MulticastEntry::new(self, ll, None);
                        inner.multicast.insert(0, shadow.clone());
                        shadow
                    }
                }),
                _ => None,
            };
            let entry = MulticastEntry::new(self, addr.clone(), shadow);
            inner.multicast.insert(0, entry.clone());
            entry
        };
        // New membership: tell the driver, outside the lock. Failure
        // does not undo the join.
        if let Err(err) = (ops.ioctl)(self, &IfRequest::AddMulticast(addr)) {
            warn!("{}: driver rejected multicast join: {err}", self.name());
        }
        Ok(entry)
    }

    /// Drops one reference to a multicast group. When the last
    /// reference goes, the entry is unlinked, its link-layer shadow is
    /// released silently, and the driver is notified once, outside the
    /// lock, for the address that was left.
    pub fn leave_multicast(&self, addr: &NetAddress) -> Result<()> {
        let gone = {
            let mut inner = self.inner().write();
            let entry = find(&inner, addr)
                .ok_or_else(|| NetifError::MulticastNotFound(addr.clone()))?;
            if !entry.release() {
                return Ok(());
            }
            unlink(&mut inner, &entry);
            if let Some(shadow) = &entry.shadow {
                if shadow.release() {
                    unlink(&mut inner, shadow);
                }
            }
            entry.addr()
        };
        let ops = self.ops();
        if let Err(err) = (ops.ioctl)(self, &IfRequest::DelMulticast(gone)) {
            warn!("{}: driver rejected multicast leave: {err}", self.name());
        }
        Ok(())
    }

    /// Forcibly dissolves every membership. Detach path; the driver is
    /// not notified, it is going away too.
    pub(crate) fn purge_multicast(&self) {
        let mut inner = self.inner().write();
        for entry in inner.multicast.drain(..) {
            entry.mark_dead();
        }
    }

    /// Snapshot of the membership list. Link-layer shadows are
    /// included.
    pub fn multicast_entries(&self) -> Vec<Arc<MulticastEntry>> {
        self.inner().read().multicast.clone()
    }

    pub fn find_multicast(&self, addr: &NetAddress) -> Option<Arc<MulticastEntry>> {
        find(&self.inner().read(), addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{tests::test_driver, DriverConfig, Driver, IfKind, TypeDefaults};
    use crate::iface::IfFlags;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn v4(s: &str) -> NetAddress {
        NetAddress::Inet(s.parse::<Ipv4Addr>().unwrap())
    }

    fn ether_iface() -> Arc<Interface> {
        let driver = test_driver("mct", 0);
        let ops = driver.bless(Some(&TypeDefaults::ethernet()));
        Interface::new(
            driver,
            ops,
            "mct0".parse().unwrap(),
            None,
            IfFlags::MULTICAST,
            1500,
            0,
        )
    }

    #[test]
    fn test_join_creates_entry_and_shadow() {
        let ifp = ether_iface();
        let entry = ifp.join_multicast(v4("224.0.0.1")).unwrap();
        assert_eq!(entry.refcount(), 1);

        let shadow = entry.link_shadow().unwrap();
        assert_eq!(shadow.family(), AddressFamily::Link);
        assert_eq!(
            shadow.addr(),
            NetAddress::Link(vec![0x01, 0x00, 0x5e, 0x00, 0x00, 0x01])
        );
        assert_eq!(shadow.refcount(), 1);
        // Protocol entry plus its shadow.
        assert_eq!(ifp.multicast_entries().len(), 2);
    }

    #[test]
    fn test_rejoin_bumps_refcount_only() {
        let ifp = ether_iface();
        let first = ifp.join_multicast(v4("224.0.0.1")).unwrap();
        let second = ifp.join_multicast(v4("224.0.0.1")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.refcount(), 2);
        // The shadow is untouched by a repeat join.
        assert_eq!(first.link_shadow().unwrap().refcount(), 1);
        assert_eq!(ifp.multicast_entries().len(), 2);
    }

    #[test]
    fn test_shared_shadow() {
        // 224.1.2.3 and 225.1.2.3 map to the same hardware group.
        let ifp = ether_iface();
        let a = ifp.join_multicast(v4("224.1.2.3")).unwrap();
        let b = ifp.join_multicast(v4("225.1.2.3")).unwrap();
        let shadow = a.link_shadow().unwrap();
        assert!(Arc::ptr_eq(&shadow, &b.link_shadow().unwrap()));
        assert_eq!(shadow.refcount(), 2);
        assert_eq!(ifp.multicast_entries().len(), 3);

        ifp.leave_multicast(&v4("224.1.2.3")).unwrap();
        assert_eq!(shadow.refcount(), 1);
        assert_eq!(ifp.multicast_entries().len(), 2);

        ifp.leave_multicast(&v4("225.1.2.3")).unwrap();
        assert_eq!(shadow.refcount(), 0);
        assert!(ifp.multicast_entries().is_empty());
    }

    #[test]
    fn test_leave_counts_down_before_unlinking() {
        let ifp = ether_iface();
        let entry = ifp.join_multicast(v4("224.0.0.1")).unwrap();
        ifp.join_multicast(v4("224.0.0.1")).unwrap();

        ifp.leave_multicast(&v4("224.0.0.1")).unwrap();
        assert_eq!(entry.refcount(), 1);
        assert_eq!(ifp.multicast_entries().len(), 2);

        ifp.leave_multicast(&v4("224.0.0.1")).unwrap();
        assert_eq!(entry.refcount(), 0);
        assert!(ifp.multicast_entries().is_empty());
        assert!(matches!(
            ifp.leave_multicast(&v4("224.0.0.1")),
            Err(NetifError::MulticastNotFound(_))
        ));
    }

    #[test]
    fn test_join_rejected_once_dying() {
        let ifp = ether_iface();
        ifp.join_multicast(v4("224.0.0.1")).unwrap();
        ifp.set_flags(IfFlags::DYING);
        ifp.purge_multicast();

        assert!(matches!(
            ifp.join_multicast(v4("224.0.0.2")),
            Err(NetifError::Dying(_))
        ));
        // Nothing may land on the list after the purge.
        assert!(ifp.multicast_entries().is_empty());
    }

    #[test]
    fn test_non_multicast_address_rejected() {
        let ifp = ether_iface();
        assert!(matches!(
            ifp.join_multicast(v4("10.0.0.1")),
            Err(NetifError::ResolveFailed(_))
        ));
    }

    #[test]
    fn test_driver_notified_once_per_new_entry() {
        let joined: Arc<Mutex<Vec<NetAddress>>> = Arc::new(Mutex::new(Vec::new()));
        let left: Arc<Mutex<Vec<NetAddress>>> = Arc::new(Mutex::new(Vec::new()));
        let (j, l) = (joined.clone(), left.clone());

        let mut config = DriverConfig::new("mcn", IfKind::Ethernet);
        config.ops.input = Some(Arc::new(|_, _| Ok(())));
        config.ops.output = Some(Arc::new(|_, _| Ok(())));
        config.ops.ioctl = Some(Arc::new(move |_, req| {
            match req {
                IfRequest::AddMulticast(a) => j.lock().push(a.clone()),
                IfRequest::DelMulticast(a) => l.lock().push(a.clone()),
                _ => {}
            }
            Ok(())
        }));
        let driver = Driver::new(config);
        let ops = driver.bless(Some(&TypeDefaults::ethernet()));
        let ifp = Interface::new(
            driver,
            ops,
            "mcn0".parse().unwrap(),
            None,
            IfFlags::MULTICAST,
            1500,
            0,
        );

        ifp.join_multicast(v4("224.0.0.1")).unwrap();
        ifp.join_multicast(v4("224.0.0.1")).unwrap();
        assert_eq!(joined.lock().as_slice(), &[v4("224.0.0.1")]);

        ifp.leave_multicast(&v4("224.0.0.1")).unwrap();
        assert!(left.lock().is_empty());
        ifp.leave_multicast(&v4("224.0.0.1")).unwrap();
        assert_eq!(left.lock().as_slice(), &[v4("224.0.0.1")]);
    }

    #[test]
    fn test_purge_zeroes_refcounts() {
        let ifp = ether_iface();
        let entry = ifp.join_multicast(v4("224.0.0.1")).unwrap();
        ifp.join_multicast(v4("224.0.0.1")).unwrap();
        let shadow = entry.link_shadow().unwrap();

        ifp.purge_multicast();
        assert!(ifp.multicast_entries().is_empty());
        assert_eq!(entry.refcount(), 0);
        assert_eq!(shadow.refcount(), 0);
        // The held handle still reads its address.
        assert_eq!(entry.addr(), v4("224.0.0.1"));
    }
}
