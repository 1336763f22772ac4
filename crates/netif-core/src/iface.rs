//! The interface entity.
//!
//! An [`Interface`] is the uniform object representing one network
//! attachment point. It is created by [`NetStack::attach`] and handed
//! out exclusively as `Arc<Interface>`: the atomic strong count is the
//! reference count, the global interface list holds the creation
//! reference, and the storage cannot be reclaimed while any holder
//! remains — even after the interface was detached and flagged dying.
//!
//! [`NetStack::attach`]: crate::stack::NetStack::attach

use crate::addr::AddressEntry;
use crate::driver::{Driver, IfOps};
use crate::error::{NetifError, Result};
use crate::group::Group;
use crate::linkstate::{LinkState, LinkTask};
use crate::multicast::MulticastEntry;
use bitflags::bitflags;
use netif_types::{AddressFamily, InterfaceName};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

bitflags! {
    /// Interface flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IfFlags: u32 {
        /// Administratively up.
        const UP            = 1 << 0;
        /// Loopback interface.
        const LOOPBACK      = 1 << 1;
        /// Point-to-point link; destination address is the peer.
        const POINTOPOINT   = 1 << 2;
        /// Supports broadcast; destination address is the broadcast
        /// address.
        const BROADCAST     = 1 << 3;
        /// Supports multicast.
        const MULTICAST     = 1 << 4;
        /// Detachment has started; no new operations are admitted.
        const DYING         = 1 << 5;
        /// Name is transiently being swapped.
        const RENAMING      = 1 << 6;
    }
}

/// Lifecycle state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum IfState {
    /// Being built by attach; not yet published.
    Constructing = 0,
    /// Linked into the stack, visible by index and name.
    Attached = 1,
    /// Detach has begun.
    Dying = 2,
    /// Fully torn down; only stale references keep it alive.
    Detached = 3,
}

impl IfState {
    fn from_u8(v: u8) -> IfState {
        match v {
            0 => IfState::Constructing,
            1 => IfState::Attached,
            2 => IfState::Dying,
            _ => IfState::Detached,
        }
    }
}

/// Per-interface statistics counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum IfCounter {
    InPackets = 0,
    InBytes,
    InErrors,
    InDrops,
    OutPackets,
    OutBytes,
    OutErrors,
    OutDrops,
    Collisions,
}

impl IfCounter {
    /// Number of counters.
    pub const COUNT: usize = 9;

    /// All counters, in index order.
    pub const ALL: [IfCounter; IfCounter::COUNT] = [
        IfCounter::InPackets,
        IfCounter::InBytes,
        IfCounter::InErrors,
        IfCounter::InDrops,
        IfCounter::OutPackets,
        IfCounter::OutBytes,
        IfCounter::OutErrors,
        IfCounter::OutDrops,
        IfCounter::Collisions,
    ];
}

/// A packet buffer handed between the subsystem and drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new(data: Vec<u8>) -> Self {
        Packet { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Receives a copy of traffic passing an interface while it is
/// attached. Deregistered before any teardown begins.
pub trait PacketTap: Send + Sync {
    fn packet(&self, iface: &Interface, packet: &Packet);
}

/// Bounded generic software send queue, created when the driver opts
/// in by declaring a positive queue length bound.
pub(crate) struct SendQueue {
    queue: Mutex<Vec<Packet>>,
    max_len: usize,
}

impl SendQueue {
    fn new(max_len: usize) -> Self {
        SendQueue {
            queue: Mutex::new(Vec::new()),
            max_len,
        }
    }

    fn enqueue(&self, packet: Packet) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() >= self.max_len {
            return false;
        }
        queue.push(packet);
        true
    }

    fn dequeue(&self) -> Option<Packet> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    fn flush(&self) -> usize {
        let mut queue = self.queue.lock();
        let n = queue.len();
        queue.clear();
        n
    }

    fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

/// State guarded by the per-interface lock: the name, the ordered
/// address list (link-layer entry first), multicast memberships, and
/// group memberships.
pub(crate) struct IfaceInner {
    pub(crate) name: InterfaceName,
    pub(crate) description: Option<String>,
    pub(crate) addrs: Vec<Arc<AddressEntry>>,
    pub(crate) multicast: Vec<Arc<MulticastEntry>>,
    pub(crate) groups: Vec<Arc<Group>>,
}

/// One network interface.
///
/// See the [module documentation](self) for the ownership model.
pub struct Interface {
    driver: Arc<Driver>,
    unit: Option<u32>,
    index: AtomicU32,
    state: AtomicU8,
    flags: AtomicU32,
    link_state: AtomicU8,
    mtu: AtomicU32,
    baudrate: AtomicU64,
    counters: [AtomicU64; IfCounter::COUNT],
    ops: RwLock<Arc<IfOps>>,
    snd: Option<SendQueue>,
    tap: RwLock<Option<Arc<dyn PacketTap>>>,
    afdata: Mutex<HashMap<AddressFamily, Box<dyn Any + Send>>>,
    link_task: LinkTask,
    attached_at: Mutex<Option<SystemTime>>,
    inner: RwLock<IfaceInner>,
}

impl Interface {
    pub(crate) fn new(
        driver: Arc<Driver>,
        ops: Arc<IfOps>,
        name: InterfaceName,
        unit: Option<u32>,
        flags: IfFlags,
        mtu: u32,
        baudrate: u64,
    ) -> Arc<Interface> {
        let snd = match driver.config().max_queue_len {
            0 => None,
            n => Some(SendQueue::new(n)),
        };
        Arc::new(Interface {
            driver,
            unit,
            index: AtomicU32::new(0),
            state: AtomicU8::new(IfState::Constructing as u8),
            flags: AtomicU32::new(flags.bits()),
            link_state: AtomicU8::new(LinkState::Unknown as u8),
            mtu: AtomicU32::new(mtu),
            baudrate: AtomicU64::new(baudrate),
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            ops: RwLock::new(ops),
            snd,
            tap: RwLock::new(None),
            afdata: Mutex::new(HashMap::new()),
            link_task: LinkTask::new(),
            attached_at: Mutex::new(None),
            inner: RwLock::new(IfaceInner {
                name,
                description: None,
                addrs: Vec::new(),
                multicast: Vec::new(),
                groups: Vec::new(),
            }),
        })
    }

    /// The interface's current name.
    pub fn name(&self) -> InterfaceName {
        self.inner.read().name.clone()
    }

    /// The driver this interface was attached by.
    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    /// Unit number, for cloned or unit-named interfaces.
    pub fn unit(&self) -> Option<u32> {
        self.unit
    }

    /// The interface index. Stable while attached; 0 means the
    /// interface currently holds no index.
    pub fn index(&self) -> u32 {
        self.index.load(Ordering::Acquire)
    }

    pub(crate) fn set_index(&self, index: u32) {
        self.index.store(index, Ordering::Release);
    }

    /// Lifecycle state.
    pub fn state(&self) -> IfState {
        IfState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: IfState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Current flags.
    pub fn flags(&self) -> IfFlags {
        IfFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub(crate) fn set_flags(&self, flags: IfFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_flags(&self, flags: IfFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// True once detachment has begun.
    pub fn is_dying(&self) -> bool {
        self.flags().contains(IfFlags::DYING)
    }

    /// Last reported link state.
    pub fn link_state(&self) -> LinkState {
        LinkState::from_u8(self.link_state.load(Ordering::Acquire))
    }

    pub(crate) fn store_link_state(&self, state: LinkState) {
        self.link_state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn link_task(&self) -> &LinkTask {
        &self.link_task
    }

    /// MTU in bytes.
    pub fn mtu(&self) -> u32 {
        self.mtu.load(Ordering::Relaxed)
    }

    pub fn set_mtu(&self, mtu: u32) {
        self.mtu.store(mtu, Ordering::Relaxed);
    }

    /// Nominal link speed in bits per second.
    pub fn baudrate(&self) -> u64 {
        self.baudrate.load(Ordering::Relaxed)
    }

    pub fn set_baudrate(&self, baudrate: u64) {
        self.baudrate.store(baudrate, Ordering::Relaxed);
    }

    /// Reads a statistics counter through the driver's counter
    /// accessor.
    pub fn counter(&self, counter: IfCounter) -> u64 {
        let ops = self.ops();
        (ops.get_counter)(self, counter)
    }

    /// Reads the generic counter storage directly, bypassing the
    /// driver accessor. This is what the default accessor returns.
    pub fn raw_counter(&self, counter: IfCounter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    pub(crate) fn add_counter(&self, counter: IfCounter, value: u64) {
        self.counters[counter as usize].fetch_add(value, Ordering::Relaxed);
    }

    /// The current operation table. Detach replaces it with a table
    /// whose operations all fail, so stale handles cannot reach freed
    /// driver resources.
    pub fn ops(&self) -> Arc<IfOps> {
        self.ops.read().clone()
    }

    pub(crate) fn set_ops(&self, ops: Arc<IfOps>) {
        *self.ops.write() = ops;
    }

    /// Free-form description.
    pub fn description(&self) -> Option<String> {
        self.inner.read().description.clone()
    }

    pub fn set_description(&self, description: Option<String>) {
        self.inner.write().description = description;
    }

    /// Timestamp of the last successful attach.
    pub fn attached_at(&self) -> Option<SystemTime> {
        *self.attached_at.lock()
    }

    pub(crate) fn stamp_attached(&self) {
        *self.attached_at.lock() = Some(SystemTime::now());
    }

    pub(crate) fn inner(&self) -> &RwLock<IfaceInner> {
        &self.inner
    }

    /// Snapshot of the address list. The link-layer entry, if present,
    /// is first.
    pub fn addresses(&self) -> Vec<Arc<AddressEntry>> {
        self.inner.read().addrs.clone()
    }

    /// The link-layer address entry, present from creation until the
    /// final stage of detach.
    pub fn link_addr(&self) -> Option<Arc<AddressEntry>> {
        self.inner
            .read()
            .addrs
            .first()
            .filter(|a| a.is_link())
            .cloned()
    }

    /// Names of all groups this interface is a member of.
    pub fn groups(&self) -> Vec<String> {
        self.inner
            .read()
            .groups
            .iter()
            .map(|g| g.name().to_string())
            .collect()
    }

    pub(crate) fn set_tap(&self, tap: Option<Arc<dyn PacketTap>>) {
        *self.tap.write() = tap;
    }

    /// Hands a copy of the packet to the registered tap, if any.
    pub fn mtap(&self, packet: &Packet) {
        let tap = self.tap.read().clone();
        if let Some(tap) = tap {
            tap.packet(self, packet);
        }
    }

    /// Delivers an inbound packet to the stack through the driver's
    /// input operation.
    pub fn input(&self, packet: Packet) -> Result<()> {
        self.mtap(&packet);
        self.add_counter(IfCounter::InPackets, 1);
        self.add_counter(IfCounter::InBytes, packet.len() as u64);
        let ops = self.ops();
        (ops.input)(self, packet)
    }

    /// Hands an outbound packet to the driver's transmit operation.
    pub fn transmit(&self, packet: Packet) -> Result<()> {
        self.mtap(&packet);
        let len = packet.len() as u64;
        let ops = self.ops();
        match (ops.transmit)(self, packet) {
            Ok(()) => {
                self.add_counter(IfCounter::OutPackets, 1);
                self.add_counter(IfCounter::OutBytes, len);
                Ok(())
            }
            Err(e) => {
                self.add_counter(IfCounter::OutErrors, 1);
                Err(e)
            }
        }
    }

    /// Appends to the software send queue.
    pub fn enqueue_send(&self, packet: Packet) -> Result<()> {
        match &self.snd {
            Some(snd) if snd.enqueue(packet) => Ok(()),
            Some(_) => {
                self.add_counter(IfCounter::OutDrops, 1);
                Err(NetifError::QueueFull(self.name().to_string()))
            }
            None => Err(NetifError::Driver(format!(
                "interface '{}' has no software send queue",
                self.name()
            ))),
        }
    }

    /// Takes the oldest packet off the software send queue.
    pub fn dequeue_send(&self) -> Option<Packet> {
        self.snd.as_ref().and_then(|snd| snd.dequeue())
    }

    /// Discards everything in the software send queue and returns the
    /// number of packets dropped.
    pub fn flush_send_queue(&self) -> usize {
        match &self.snd {
            Some(snd) => {
                let n = snd.flush();
                self.add_counter(IfCounter::OutDrops, n as u64);
                n
            }
            None => 0,
        }
    }

    /// Packets currently queued for transmission.
    pub fn send_queue_len(&self) -> usize {
        self.snd.as_ref().map_or(0, |snd| snd.len())
    }

    pub(crate) fn afdata_insert(&self, family: AddressFamily, data: Box<dyn Any + Send>) {
        self.afdata.lock().insert(family, data);
    }

    pub(crate) fn afdata_remove(&self, family: AddressFamily) -> Option<Box<dyn Any + Send>> {
        self.afdata.lock().remove(&family)
    }
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name())
            .field("index", &self.index())
            .field("state", &self.state())
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::tests::test_driver;
    use pretty_assertions::assert_eq;

    fn test_iface(name: &str, queue_len: usize) -> Arc<Interface> {
        let driver = test_driver("tst", queue_len);
        let ops = driver.bless(None);
        Interface::new(
            driver,
            ops,
            name.parse().unwrap(),
            None,
            IfFlags::BROADCAST | IfFlags::MULTICAST,
            1500,
            0,
        )
    }

    #[test]
    fn test_initial_state() {
        let iface = test_iface("eth0", 0);
        assert_eq!(iface.state(), IfState::Constructing);
        assert_eq!(iface.index(), 0);
        assert_eq!(iface.link_state(), LinkState::Unknown);
        assert!(!iface.is_dying());
        assert_eq!(iface.name(), "eth0".parse::<InterfaceName>().unwrap());
    }

    #[test]
    fn test_flag_set_and_clear() {
        let iface = test_iface("eth0", 0);
        iface.set_flags(IfFlags::UP);
        assert!(iface.flags().contains(IfFlags::UP));
        assert!(iface.flags().contains(IfFlags::BROADCAST));
        iface.clear_flags(IfFlags::UP);
        assert!(!iface.flags().contains(IfFlags::UP));
    }

    #[test]
    fn test_dying_flag() {
        let iface = test_iface("eth0", 0);
        iface.set_flags(IfFlags::DYING);
        assert!(iface.is_dying());
    }

    #[test]
    fn test_counters_accumulate() {
        let iface = test_iface("eth0", 0);
        iface.add_counter(IfCounter::InPackets, 3);
        iface.add_counter(IfCounter::InBytes, 180);
        assert_eq!(iface.raw_counter(IfCounter::InPackets), 3);
        assert_eq!(iface.raw_counter(IfCounter::InBytes), 180);
        // Default accessor reads the same storage.
        assert_eq!(iface.counter(IfCounter::InPackets), 3);
        assert_eq!(iface.counter(IfCounter::OutPackets), 0);
    }

    #[test]
    fn test_send_queue_bounds() {
        let iface = test_iface("eth0", 2);
        iface.enqueue_send(Packet::new(vec![1])).unwrap();
        iface.enqueue_send(Packet::new(vec![2])).unwrap();
        assert!(matches!(
            iface.enqueue_send(Packet::new(vec![3])),
            Err(NetifError::QueueFull(_))
        ));
        assert_eq!(iface.send_queue_len(), 2);
        assert_eq!(iface.dequeue_send(), Some(Packet::new(vec![1])));
        assert_eq!(iface.flush_send_queue(), 1);
        assert_eq!(iface.send_queue_len(), 0);
    }

    #[test]
    fn test_no_send_queue() {
        let iface = test_iface("eth0", 0);
        assert!(iface.enqueue_send(Packet::new(vec![1])).is_err());
        assert_eq!(iface.flush_send_queue(), 0);
        assert_eq!(iface.dequeue_send(), None);
    }

    #[test]
    fn test_tap_sees_input() {
        struct CountingTap(std::sync::atomic::AtomicUsize);
        impl PacketTap for CountingTap {
            fn packet(&self, _iface: &Interface, _packet: &Packet) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let iface = test_iface("eth0", 0);
        let tap = Arc::new(CountingTap(std::sync::atomic::AtomicUsize::new(0)));
        iface.set_tap(Some(tap.clone()));
        iface.input(Packet::new(vec![0; 64])).unwrap();
        assert_eq!(tap.0.load(Ordering::Relaxed), 1);
        assert_eq!(iface.raw_counter(IfCounter::InPackets), 1);
        assert_eq!(iface.raw_counter(IfCounter::InBytes), 64);

        iface.set_tap(None);
        iface.input(Packet::new(vec![0; 64])).unwrap();
        assert_eq!(tap.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_description() {
        let iface = test_iface("eth0", 0);
        assert_eq!(iface.description(), None);
        iface.set_description(Some("uplink".into()));
        assert_eq!(iface.description(), Some("uplink".into()));
    }
}
