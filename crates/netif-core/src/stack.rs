//! The network stack: interface registry and lifecycle.
//!
//! A [`NetStack`] owns the interface list, the index table, the group
//! registry, the registered protocol domains, and the link-state
//! worker thread. All structural operations (attach, detach, rename,
//! move) are serialized on a structural mutex; lookups take only the
//! registry read lock.
//!
//! Lock order: structural mutex, then the stack's registry lock, then
//! a single interface's lock. Driver callbacks and event sinks are
//! always invoked with no stack lock held.

use crate::addr::AddressEntry;
use crate::driver::{Driver, IfKind, IfOps, IfRequest, TypeDefaults};
use crate::error::{NetifError, Result};
use crate::event::{Event, EventRegistry, EventSink};
use crate::group::{Group, GroupChange, GroupRegistry};
use crate::iface::{IfFlags, IfState, Interface, PacketTap};
use crate::index::IndexTable;
use crate::linkstate::{LinkState, LinkWorker};
use log::{info, warn};
use netif_types::{InterfaceName, LinkAddress};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Attach interface version. Compiled into [`AttachArgs::new`] and
/// checked at attach; a mismatch means the caller was built against a
/// different layout of the args structure and is a programming error.
pub const ATTACH_VERSION: u32 = 1;

/// Every attached interface is a member of this group.
pub const ALL_GROUP: &str = "all";

/// A protocol family hooked into interface lifecycle.
///
/// `ifattach` may return per-interface state; it is stored on the
/// interface and handed back to `ifdetach` during teardown.
pub trait Domain: Send + Sync {
    fn family(&self) -> netif_types::AddressFamily;

    /// Called after the interface is published.
    fn ifattach(&self, _iface: &Arc<Interface>) -> Option<Box<dyn Any + Send>> {
        None
    }

    /// Called during detach, after the departure announcement, with
    /// whatever `ifattach` returned.
    fn ifdetach(&self, _iface: &Arc<Interface>, _data: Option<Box<dyn Any + Send>>) {}

    /// Called for each purged address of this family during detach,
    /// outside all locks.
    fn purge_addr(&self, _entry: &Arc<AddressEntry>) {}
}

/// Parameters for [`NetStack::attach`].
pub struct AttachArgs {
    /// Must be [`ATTACH_VERSION`].
    pub version: u32,
    pub driver: Arc<Driver>,
    /// Explicit name; `None` derives `<driver><unit>`.
    pub name: Option<InterfaceName>,
    /// Requested unit for cloning drivers; `None` takes the lowest
    /// free unit.
    pub unit: Option<u32>,
    /// Hardware address, padded or truncated to the driver's address
    /// length.
    pub link_addr: Option<Vec<u8>>,
    pub flags: IfFlags,
    pub mtu: u32,
    pub baudrate: u64,
    pub description: Option<String>,
    pub tap: Option<Arc<dyn PacketTap>>,
}

impl AttachArgs {
    pub fn new(driver: Arc<Driver>) -> AttachArgs {
        AttachArgs {
            version: ATTACH_VERSION,
            driver,
            name: None,
            unit: None,
            link_addr: None,
            flags: IfFlags::empty(),
            mtu: 1500,
            baudrate: 0,
            description: None,
            tap: None,
        }
    }
}

struct StackInner {
    list: Vec<Arc<Interface>>,
    index: IndexTable,
    groups: GroupRegistry,
}

/// One instance of the interface subsystem.
pub struct NetStack {
    inner: RwLock<StackInner>,
    /// Serializes attach, detach, rename and move against each other.
    structural: Mutex<()>,
    events: Arc<EventRegistry>,
    types: RwLock<HashMap<IfKind, Arc<TypeDefaults>>>,
    domains: RwLock<Vec<Arc<dyn Domain>>>,
    worker: LinkWorker,
}

impl NetStack {
    /// Creates a stack with its link-state worker running and the
    /// Ethernet type defaults registered.
    pub fn new() -> Arc<NetStack> {
        let events = Arc::new(EventRegistry::new());
        let worker = LinkWorker::spawn(events.clone());
        let mut types = HashMap::new();
        types.insert(IfKind::Ethernet, Arc::new(TypeDefaults::ethernet()));
        Arc::new(NetStack {
            inner: RwLock::new(StackInner {
                list: Vec::new(),
                index: IndexTable::new(),
                groups: GroupRegistry::new(),
            }),
            structural: Mutex::new(()),
            events,
            types: RwLock::new(types),
            domains: RwLock::new(Vec::new()),
            worker,
        })
    }

    /// Registers per-kind defaults merged into driver operation tables
    /// at first attach. Replaces any previous defaults for `kind`;
    /// already-blessed drivers are unaffected.
    pub fn register_type(&self, kind: IfKind, defaults: TypeDefaults) {
        self.types.write().insert(kind, Arc::new(defaults));
    }

    pub fn register_domain(&self, domain: Arc<dyn Domain>) {
        self.domains.write().push(domain);
    }

    pub fn register_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.events.register(sink);
    }

    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    /// Creates and publishes an interface.
    ///
    /// The only admissible failure is unit allocation (or a name that
    /// cannot be formed from it); everything after that point succeeds.
    /// Panics if `args.version` does not match, or if the driver's
    /// operation table violates the blessing contract.
    pub fn attach(&self, args: AttachArgs) -> Result<Arc<Interface>> {
        assert_eq!(
            args.version, ATTACH_VERSION,
            "attach args version mismatch: rebuild the caller"
        );
        let _structural = self.structural.lock();

        let defaults = self.types.read().get(&args.driver.kind()).cloned();
        let ops = args.driver.bless(defaults.as_deref());

        let unit = match args.driver.config().clone_units {
            Some(_) => Some(args.driver.alloc_unit(args.unit)?),
            None => None,
        };
        let name = match args.name {
            Some(name) => name,
            None => {
                match InterfaceName::with_unit(args.driver.name(), unit.unwrap_or(0)) {
                    Ok(name) => name,
                    Err(err) => {
                        if let Some(u) = unit {
                            args.driver.free_unit(u);
                        }
                        return Err(err.into());
                    }
                }
            }
        };

        let iface = Interface::new(
            args.driver,
            ops.clone(),
            name.clone(),
            unit,
            args.flags,
            args.mtu,
            args.baudrate,
        );
        if args.description.is_some() {
            iface.inner().write().description = args.description;
        }
        iface.set_tap(args.tap);

        let index = self.inner.write().index.reserve();
        iface.set_index(index);

        // Link-layer entry goes first in the address list, sized to
        // the driver's hardware address length.
        let mut hwaddr = args.link_addr.unwrap_or_default();
        hwaddr.resize(ops.addr_len, 0);
        let lla = AddressEntry::link(&iface, LinkAddress::new(name.clone(), index, hwaddr));
        iface.inner().write().addrs.insert(0, lla);

        if let Some(hook) = defaults.as_ref().and_then(|d| d.attach.clone()) {
            hook(&iface);
        }

        // Publish: visible by index and name from here on.
        {
            let mut inner = self.inner.write();
            inner.index.bind(index, iface.clone());
            inner.list.push(iface.clone());
        }
        iface.set_state(IfState::Attached);
        iface.stamp_attached();

        let change = self.inner.write().groups.join(ALL_GROUP, &iface);
        self.fire_group_changes(change.ok().into_iter().collect());

        for domain in self.domains.read().clone() {
            if let Some(data) = domain.ifattach(&iface) {
                iface.afdata_insert(domain.family(), data);
            }
        }

        info!("{name} attached at index {index}");
        self.events.fire(Event::Arrival {
            name: name.to_string(),
            index,
        });
        Ok(iface)
    }

    /// Tears an interface down and withdraws it from the registry.
    ///
    /// Idempotent: detaching an interface that is not in this stack is
    /// a no-op. Handles held elsewhere stay readable; the operation
    /// table is replaced by one that fails every call.
    pub fn detach(&self, iface: &Arc<Interface>) -> Result<()> {
        let _structural = self.structural.lock();
        self.detach_internal(iface, false)
    }

    fn detach_internal(&self, iface: &Arc<Interface>, moving: bool) -> Result<()> {
        // The dying flag goes up before the interface leaves the
        // list, under the same registry lock the lookups take.
        let unlinked = {
            let mut inner = self.inner.write();
            let pos = inner.list.iter().position(|i| Arc::ptr_eq(i, iface));
            match pos {
                Some(pos) => {
                    iface.set_flags(IfFlags::DYING);
                    iface.set_state(IfState::Dying);
                    inner.list.remove(pos);
                    true
                }
                None => false,
            }
        };
        if !unlinked {
            if moving {
                return Err(NetifError::NotFound(iface.name().to_string()));
            }
            return Ok(());
        }
        let name = iface.name();
        let index = iface.index();

        iface.set_tap(None);

        // Let any in-flight link-state delivery finish before the
        // teardown proper.
        iface.link_task().drain();

        iface.clear_flags(IfFlags::UP);
        let ops = iface.ops();
        (ops.qflush)(iface);

        if !moving {
            let purged = iface.take_proto_addrs();
            let domains = self.domains.read().clone();
            for entry in &purged {
                for domain in domains.iter().filter(|d| d.family() == entry.family()) {
                    domain.purge_addr(entry);
                }
            }
            iface.purge_multicast();
        }

        // Groups are stack-local: a moving interface leaves them too
        // and rejoins "all" on the destination.
        let changes = self.inner.write().groups.leave_all(iface);
        self.fire_group_changes(changes);

        self.events.fire(Event::Departure {
            name: name.to_string(),
            index,
        });

        if !moving {
            let defaults = self.types.read().get(&iface.driver().kind()).cloned();
            if let Some(hook) = defaults.as_ref().and_then(|d| d.detach.clone()) {
                if let Err(err) = hook(iface) {
                    warn!("{name}: type detach hook failed: {err}");
                }
            }
            iface.set_ops(IfOps::dead());
        }

        {
            let mut inner = self.inner.write();
            inner.index.release(index);
        }
        iface.set_index(0);

        if !moving {
            iface.drop_link_addr();
            let domains = self.domains.read().clone();
            for domain in domains {
                let data = iface.afdata_remove(domain.family());
                domain.ifdetach(iface, data);
            }
            if let Some(unit) = iface.unit() {
                iface.driver().free_unit(unit);
            }
            iface.set_state(IfState::Detached);
            info!("{name} detached");
        }
        Ok(())
    }

    /// Renames an interface, announcing it as a departure under the
    /// old name and an arrival under the new one. The link-layer
    /// entry's name label is rewritten in place.
    pub fn rename(&self, iface: &Arc<Interface>, new_name: InterfaceName) -> Result<()> {
        let _structural = self.structural.lock();
        if iface.is_dying() {
            return Err(NetifError::Dying(iface.name().to_string()));
        }
        if iface.flags().contains(IfFlags::RENAMING) {
            return Err(NetifError::RenameInProgress(iface.name().to_string()));
        }
        if iface.state() != IfState::Attached {
            return Err(NetifError::NotFound(iface.name().to_string()));
        }
        // Name uniqueness is per stack; only the owning stack may
        // rename.
        if !self
            .inner
            .read()
            .list
            .iter()
            .any(|i| Arc::ptr_eq(i, iface))
        {
            return Err(NetifError::NotFound(iface.name().to_string()));
        }
        let old_name = iface.name();
        if old_name == new_name {
            return Ok(());
        }
        if self.by_name(new_name.as_str()).is_some() {
            return Err(NetifError::NameExists(new_name.to_string()));
        }

        let index = iface.index();
        iface.set_flags(IfFlags::RENAMING);
        self.events.fire(Event::Departure {
            name: old_name.to_string(),
            index,
        });
        {
            let mut inner = iface.inner().write();
            inner.name = new_name.clone();
            for entry in inner.addrs.iter().filter(|e| e.is_link()) {
                entry.set_link_name(new_name.clone());
            }
        }
        self.events.fire(Event::Arrival {
            name: new_name.to_string(),
            index,
        });
        iface.clear_flags(IfFlags::RENAMING);
        info!("{old_name} renamed to {new_name}");
        Ok(())
    }

    /// Moves an attached interface from this stack to `dst`. The
    /// interface keeps its name, addresses and memberships-free state;
    /// it is renumbered in the destination's index table.
    pub fn move_interface(
        self: &Arc<NetStack>,
        iface: &Arc<Interface>,
        dst: &Arc<NetStack>,
    ) -> Result<()> {
        if Arc::ptr_eq(self, dst) {
            return Ok(());
        }
        // Both structural mutexes, in address order.
        let (first, second) = if Arc::as_ptr(self) < Arc::as_ptr(dst) {
            (self, dst)
        } else {
            (dst, self)
        };
        let _g1 = first.structural.lock();
        let _g2 = second.structural.lock();

        let name = iface.name();
        if dst.by_name(name.as_str()).is_some() {
            return Err(NetifError::NameExists(name.to_string()));
        }

        self.detach_internal(iface, true)?;

        if let Some(reassign) = &iface.ops().reassign {
            reassign(iface);
        }

        let index = {
            let mut inner = dst.inner.write();
            let index = inner.index.reserve();
            inner.index.bind(index, iface.clone());
            inner.list.push(iface.clone());
            index
        };
        iface.set_index(index);
        {
            let inner = iface.inner().read();
            for entry in inner.addrs.iter().filter(|e| e.is_link()) {
                entry.set_link_index(index);
            }
        }
        iface.clear_flags(IfFlags::DYING);
        iface.set_state(IfState::Attached);

        let change = dst.inner.write().groups.join(ALL_GROUP, iface);
        dst.fire_group_changes(change.ok().into_iter().collect());

        info!("{name} moved to new stack at index {index}");
        dst.events.fire(Event::Arrival {
            name: name.to_string(),
            index,
        });
        Ok(())
    }

    /// Interface at `index`, whatever its state. `None` for free or
    /// reserved slots.
    pub fn by_index(&self, index: u32) -> Option<Arc<Interface>> {
        self.inner.read().index.lookup(index).cloned()
    }

    /// Interface at `index`, refusing interfaces on their way out.
    pub fn acquire_by_index(&self, index: u32) -> Result<Arc<Interface>> {
        let iface = self
            .by_index(index)
            .ok_or_else(|| NetifError::NotFound(format!("index {index}")))?;
        if iface.is_dying() {
            return Err(NetifError::Dying(iface.name().to_string()));
        }
        Ok(iface)
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Interface>> {
        self.inner
            .read()
            .list
            .iter()
            .find(|i| i.name() == name)
            .cloned()
    }

    pub fn acquire_by_name(&self, name: &str) -> Result<Arc<Interface>> {
        let iface = self
            .by_name(name)
            .ok_or_else(|| NetifError::NotFound(name.to_string()))?;
        if iface.is_dying() {
            return Err(NetifError::Dying(name.to_string()));
        }
        Ok(iface)
    }

    /// Snapshot of all attached interfaces, in attach order.
    pub fn list(&self) -> Vec<Arc<Interface>> {
        self.inner.read().list.clone()
    }

    /// Highest index ever handed out and not yet reclaimed.
    pub fn last_index(&self) -> u32 {
        self.inner.read().index.last_index()
    }

    /// Adds `iface` to the named group, creating the group on first
    /// join.
    pub fn join_group(&self, iface: &Arc<Interface>, group: &str) -> Result<()> {
        if iface.is_dying() {
            return Err(NetifError::Dying(iface.name().to_string()));
        }
        let change = self.inner.write().groups.join(group, iface)?;
        self.fire_group_changes(vec![change]);
        Ok(())
    }

    /// Removes `iface` from the named group, destroying the group when
    /// its last member leaves.
    pub fn leave_group(&self, iface: &Arc<Interface>, group: &str) -> Result<()> {
        let change = self.inner.write().groups.leave(group, iface)?;
        self.fire_group_changes(vec![change]);
        Ok(())
    }

    pub fn group(&self, name: &str) -> Option<Arc<Group>> {
        self.inner.read().groups.find(name)
    }

    pub fn groups(&self) -> Vec<Arc<Group>> {
        self.inner.read().groups.all()
    }

    // Events fire after the registry lock is released.
    fn fire_group_changes(&self, changes: Vec<GroupChange>) {
        for change in changes {
            match change {
                GroupChange::Created(g) => {
                    self.events.fire(Event::GroupCreated {
                        group: g.name().to_string(),
                    });
                    self.events.fire(Event::GroupChanged {
                        group: g.name().to_string(),
                    });
                }
                GroupChange::Joined(g) | GroupChange::Left(g) => {
                    self.events.fire(Event::GroupChanged {
                        group: g.name().to_string(),
                    });
                }
                GroupChange::Destroyed(g) => {
                    self.events.fire(Event::GroupChanged {
                        group: g.name().to_string(),
                    });
                    self.events.fire(Event::GroupDestroyed {
                        group: g.name().to_string(),
                    });
                }
            }
        }
    }

    /// Marks the interface administratively up and tells the driver.
    pub fn mark_up(&self, iface: &Arc<Interface>) -> Result<()> {
        if iface.is_dying() {
            return Err(NetifError::Dying(iface.name().to_string()));
        }
        if iface.flags().contains(IfFlags::UP) {
            return Ok(());
        }
        iface.set_flags(IfFlags::UP);
        self.notify_flags(iface);
        Ok(())
    }

    /// Marks the interface administratively down: clears the up flag,
    /// discards anything queued for transmission, tells the driver and
    /// schedules a link-down announcement.
    pub fn mark_down(&self, iface: &Arc<Interface>) -> Result<()> {
        if iface.is_dying() {
            return Err(NetifError::Dying(iface.name().to_string()));
        }
        if !iface.flags().contains(IfFlags::UP) {
            return Ok(());
        }
        iface.clear_flags(IfFlags::UP);
        iface.flush_send_queue();
        self.notify_flags(iface);
        self.link_state_change(iface, LinkState::Down);
        Ok(())
    }

    fn notify_flags(&self, iface: &Arc<Interface>) {
        let ops = iface.ops();
        if let Err(err) = (ops.ioctl)(iface, &IfRequest::SetFlags(iface.flags())) {
            warn!("{}: driver rejected flags change: {err}", iface.name());
        }
    }

    /// Records a link-state transition and schedules its announcement
    /// on the worker thread. Back-to-back transitions coalesce: only
    /// the state current at delivery time is announced.
    pub fn link_state_change(&self, iface: &Arc<Interface>, state: LinkState) {
        if iface.link_state() == state {
            return;
        }
        iface.store_link_state(state);
        if iface.link_task().note() {
            self.worker.enqueue(iface.clone());
        }
    }

    /// Blocks until every link-state transition recorded so far for
    /// `iface` has been announced.
    pub fn flush_link_events(&self, iface: &Interface) {
        iface.link_task().drain();
    }

    /// First address whose network contains `addr`, across all
    /// interfaces, preferring the longest prefix. Among equally good
    /// matches, real addresses are preferred over redundancy-protocol
    /// ones, and masters over backups.
    pub fn find_net_addr(&self, addr: &netif_types::NetAddress) -> Option<Arc<AddressEntry>> {
        let list = self.list();
        let mut best: Option<Arc<AddressEntry>> = None;
        for iface in &list {
            for entry in iface.addresses() {
                if entry.is_link() || entry.family() != addr.family() {
                    continue;
                }
                let Some(mask) = entry.netmask() else {
                    if entry.addr() == *addr || entry.dst_addr().is_some_and(|d| d == *addr) {
                        return Some(entry);
                    }
                    continue;
                };
                if !entry.addr().masked_matches(addr, &mask) {
                    continue;
                }
                match &best {
                    None => best = Some(entry),
                    Some(cur) => {
                        let refines = match cur.netmask() {
                            Some(cur_mask) => mask.mask_refines(&cur_mask),
                            None => false,
                        };
                        if refines || AddressEntry::preferred(cur, &entry) {
                            best = Some(entry);
                        }
                    }
                }
            }
        }
        best
    }

    /// Exact-match address lookup across all interfaces.
    pub fn find_addr(&self, addr: &netif_types::NetAddress) -> Option<Arc<AddressEntry>> {
        self.scan_addrs(|e| e.addr() == *addr)
    }

    /// Broadcast-address lookup across broadcast-capable interfaces.
    pub fn find_broadcast_addr(
        &self,
        addr: &netif_types::NetAddress,
    ) -> Option<Arc<AddressEntry>> {
        self.scan_addrs(|e| {
            e.interface()
                .is_some_and(|i| i.flags().contains(IfFlags::BROADCAST))
                && e.dst_addr().is_some_and(|d| d == *addr)
        })
    }

    /// Peer-address lookup across point-to-point interfaces.
    pub fn find_dst_addr(&self, addr: &netif_types::NetAddress) -> Option<Arc<AddressEntry>> {
        self.scan_addrs(|e| {
            e.interface()
                .is_some_and(|i| i.flags().contains(IfFlags::POINTOPOINT))
                && e.dst_addr().is_some_and(|d| d == *addr)
        })
    }

    fn scan_addrs(
        &self,
        pred: impl Fn(&Arc<AddressEntry>) -> bool,
    ) -> Option<Arc<AddressEntry>> {
        self.list()
            .iter()
            .flat_map(|i| i.addresses())
            .filter(|e| !e.is_link())
            .find(pred)
    }
}

impl Drop for NetStack {
    fn drop(&mut self) {
        self.worker.shutdown();
    }
}
