//! Driver operation tables and capability resolution.
//!
//! A driver hands the subsystem a partially filled [`DriverOps`] table.
//! On the first attach of that driver the table is *blessed*: missing
//! operations are copied from the defaults registered for the driver's
//! hardware kind, unconditional fallbacks fill whatever is still
//! unset, and the result is frozen into an immutable [`IfOps`] shared
//! by every instance of the driver. Blessing is idempotent; repeat
//! attaches reuse the frozen table.
//!
//! Contract violations between driver and subsystem (a declared
//! software queue together with a custom flush, a missing mandatory
//! operation) are build-time integration bugs and panic at blessing
//! time rather than surfacing as runtime errors.

use crate::error::{NetifError, Result};
use crate::iface::{IfCounter, IfFlags, Interface, Packet};
use netif_types::NetAddress;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Hardware kind of an interface driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IfKind {
    Ethernet,
    Loopback,
    PointToPoint,
    Virtual,
}

/// A request delivered to the driver through its ioctl operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfRequest {
    /// A new multicast membership needs a hardware filter update.
    AddMulticast(NetAddress),
    /// The last reference to a membership went away.
    DelMulticast(NetAddress),
    /// Flags changed.
    SetFlags(IfFlags),
    /// MTU changed.
    SetMtu(u32),
}

pub type InputFn = dyn Fn(&Interface, Packet) -> Result<()> + Send + Sync;
pub type TransmitFn = dyn Fn(&Interface, Packet) -> Result<()> + Send + Sync;
pub type OutputFn = dyn Fn(&Interface, Packet) -> Result<()> + Send + Sync;
pub type IoctlFn = dyn Fn(&Interface, &IfRequest) -> Result<()> + Send + Sync;
pub type GetCounterFn = dyn Fn(&Interface, IfCounter) -> u64 + Send + Sync;
pub type QflushFn = dyn Fn(&Interface) + Send + Sync;
pub type ResolveMultiFn = dyn Fn(&Interface, &NetAddress) -> Result<Option<NetAddress>> + Send + Sync;
pub type ReassignFn = dyn Fn(&Interface) + Send + Sync;

/// Operations supplied by a driver. Any entry may be left empty and
/// filled in by blessing.
#[derive(Default, Clone)]
pub struct DriverOps {
    pub input: Option<Arc<InputFn>>,
    pub transmit: Option<Arc<TransmitFn>>,
    pub output: Option<Arc<OutputFn>>,
    pub ioctl: Option<Arc<IoctlFn>>,
    pub get_counter: Option<Arc<GetCounterFn>>,
    pub qflush: Option<Arc<QflushFn>>,
    pub resolve_multicast: Option<Arc<ResolveMultiFn>>,
    pub reassign: Option<Arc<ReassignFn>>,
}

/// A blessed, fully populated operation table.
///
/// `resolve_multicast` and `reassign` stay optional: their absence is
/// a legal driver property, not a missing implementation.
pub struct IfOps {
    pub input: Arc<InputFn>,
    pub transmit: Arc<TransmitFn>,
    pub output: Arc<OutputFn>,
    pub ioctl: Arc<IoctlFn>,
    pub get_counter: Arc<GetCounterFn>,
    pub qflush: Arc<QflushFn>,
    pub resolve_multicast: Option<Arc<ResolveMultiFn>>,
    pub reassign: Option<Arc<ReassignFn>>,
    /// Link-layer address length in bytes.
    pub addr_len: usize,
    /// Link-layer header length in bytes.
    pub header_len: usize,
    dead: bool,
}

static DEAD_OPS: Lazy<Arc<IfOps>> = Lazy::new(|| {
    Arc::new(IfOps {
        input: Arc::new(|_, _| Err(NetifError::Dead)),
        transmit: Arc::new(|_, _| Err(NetifError::Dead)),
        output: Arc::new(|_, _| Err(NetifError::Dead)),
        ioctl: Arc::new(|_, _| Err(NetifError::Dead)),
        // Counter storage lives in the interface, not the driver, so
        // reading stays safe after detach.
        get_counter: Arc::new(|iface, c| iface.raw_counter(c)),
        qflush: Arc::new(|_| {}),
        resolve_multicast: None,
        reassign: None,
        addr_len: 0,
        header_len: 0,
        dead: true,
    })
});

impl IfOps {
    /// The table installed at detach: every operational entry fails
    /// with [`NetifError::Dead`] so stale handles cannot reach freed
    /// driver resources.
    pub fn dead() -> Arc<IfOps> {
        DEAD_OPS.clone()
    }

    /// True for the dead table.
    pub fn is_dead(&self) -> bool {
        self.dead
    }
}

/// Default operations registered for a hardware kind.
///
/// The attach/detach hooks run once per interface of this kind, after
/// the interface is constructed and while it is being torn down.
#[derive(Default, Clone)]
pub struct TypeDefaults {
    pub ops: DriverOps,
    pub addr_len: usize,
    pub header_len: usize,
    pub attach: Option<Arc<dyn Fn(&Arc<Interface>) + Send + Sync>>,
    pub detach: Option<Arc<dyn Fn(&Arc<Interface>) -> Result<()> + Send + Sync>>,
}

impl TypeDefaults {
    /// Ready-made defaults for Ethernet-like drivers: 6-byte hardware
    /// addresses, 14-byte headers, and standard IPv4/IPv6 multicast
    /// address mapping.
    pub fn ethernet() -> TypeDefaults {
        TypeDefaults {
            ops: DriverOps {
                resolve_multicast: Some(Arc::new(ether_resolve_multicast)),
                ..DriverOps::default()
            },
            addr_len: 6,
            header_len: 14,
            attach: None,
            detach: None,
        }
    }
}

/// Maps a protocol multicast address to its Ethernet group address.
fn ether_resolve_multicast(
    _iface: &Interface,
    addr: &NetAddress,
) -> Result<Option<NetAddress>> {
    match addr {
        NetAddress::Inet(ip) => {
            if !ip.is_multicast() {
                return Err(NetifError::ResolveFailed(addr.clone()));
            }
            let o = ip.octets();
            Ok(Some(NetAddress::Link(vec![
                0x01,
                0x00,
                0x5e,
                o[1] & 0x7f,
                o[2],
                o[3],
            ])))
        }
        NetAddress::Inet6(ip) => {
            if !ip.is_multicast() {
                return Err(NetifError::ResolveFailed(addr.clone()));
            }
            let o = ip.octets();
            Ok(Some(NetAddress::Link(vec![
                0x33, 0x33, o[12], o[13], o[14], o[15],
            ])))
        }
        // Already a link-layer group; no shadow entry needed.
        NetAddress::Link(_) => Ok(None),
    }
}

/// Static description of a driver, supplied once at registration.
#[derive(Clone)]
pub struct DriverConfig {
    /// Driver name, also the base for unit-derived interface names.
    pub name: String,
    pub kind: IfKind,
    pub ops: DriverOps,
    /// Link-layer address length; 0 inherits the kind default.
    pub addr_len: usize,
    /// Link-layer header length; 0 inherits the kind default.
    pub header_len: usize,
    /// A positive bound opts into the generic software send queue and
    /// its flush implementation.
    pub max_queue_len: usize,
    /// `Some(n)` makes this a cloning driver with unit numbers 0..n.
    pub clone_units: Option<u32>,
}

impl DriverConfig {
    pub fn new(name: impl Into<String>, kind: IfKind) -> Self {
        DriverConfig {
            name: name.into(),
            kind,
            ops: DriverOps::default(),
            addr_len: 0,
            header_len: 0,
            max_queue_len: 0,
            clone_units: None,
        }
    }
}

/// A registered interface driver.
///
/// Shared by all interface instances the driver attaches; holds the
/// blessed operation table and the unit number allocator.
pub struct Driver {
    config: DriverConfig,
    blessed: OnceCell<Arc<IfOps>>,
    units: Mutex<BTreeSet<u32>>,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Arc<Driver> {
        Arc::new(Driver {
            config,
            blessed: OnceCell::new(),
            units: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn kind(&self) -> IfKind {
        self.config.kind
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// True once the first attach resolved the operation table.
    pub fn is_blessed(&self) -> bool {
        self.blessed.get().is_some()
    }

    /// Resolves the driver's operation table against the kind defaults.
    ///
    /// Performed lazily on first attach; later calls return the frozen
    /// table regardless of `type_defaults`.
    ///
    /// # Panics
    ///
    /// Panics if the driver declares a software send queue and also
    /// supplies a custom `qflush`, or if `input`, `output` or `ioctl`
    /// is missing after the merge. Both are integration bugs, not
    /// runtime conditions.
    pub fn bless(&self, type_defaults: Option<&TypeDefaults>) -> Arc<IfOps> {
        self.blessed
            .get_or_init(|| self.resolve_ops(type_defaults))
            .clone()
    }

    fn resolve_ops(&self, type_defaults: Option<&TypeDefaults>) -> Arc<IfOps> {
        let mut ops = self.config.ops.clone();
        let mut addr_len = self.config.addr_len;
        let mut header_len = self.config.header_len;

        if let Some(t) = type_defaults {
            macro_rules! copy_op {
                ($op:ident) => {
                    if ops.$op.is_none() {
                        ops.$op = t.ops.$op.clone();
                    }
                };
            }
            copy_op!(input);
            copy_op!(transmit);
            copy_op!(output);
            copy_op!(ioctl);
            copy_op!(get_counter);
            copy_op!(qflush);
            copy_op!(resolve_multicast);
            copy_op!(reassign);
            if addr_len == 0 {
                addr_len = t.addr_len;
            }
            if header_len == 0 {
                header_len = t.header_len;
            }
        }

        if self.config.max_queue_len > 0 {
            if self.config.ops.qflush.is_some() {
                panic!(
                    "driver '{}': declares a software send queue and a custom qflush",
                    self.config.name
                );
            }
            ops.qflush = Some(Arc::new(|iface: &Interface| {
                iface.flush_send_queue();
            }));
        }

        macro_rules! mandatory {
            ($op:ident) => {
                ops.$op.unwrap_or_else(|| {
                    panic!(
                        "driver '{}': no {} operation and no kind default",
                        self.config.name,
                        stringify!($op)
                    )
                })
            };
        }

        Arc::new(IfOps {
            input: mandatory!(input),
            output: mandatory!(output),
            ioctl: mandatory!(ioctl),
            transmit: ops.transmit.unwrap_or_else(|| Arc::new(default_transmit)),
            get_counter: ops
                .get_counter
                .unwrap_or_else(|| Arc::new(|iface, c| iface.raw_counter(c))),
            qflush: ops.qflush.unwrap_or_else(|| Arc::new(|_| {})),
            resolve_multicast: ops.resolve_multicast,
            reassign: ops.reassign,
            addr_len,
            header_len,
            dead: false,
        })
    }

    /// Allocates a unit number for a cloning driver. The lowest free
    /// unit is taken unless a specific one is requested.
    pub fn alloc_unit(&self, requested: Option<u32>) -> Result<u32> {
        let max = match self.config.clone_units {
            Some(max) => max,
            None => {
                return Err(NetifError::Driver(format!(
                    "driver '{}' does not clone",
                    self.config.name
                )))
            }
        };
        let mut units = self.units.lock();
        match requested {
            Some(unit) => {
                if unit >= max {
                    return Err(NetifError::UnitExhausted(self.config.name.clone()));
                }
                if !units.insert(unit) {
                    return Err(NetifError::UnitBusy {
                        driver: self.config.name.clone(),
                        unit,
                    });
                }
                Ok(unit)
            }
            None => match (0..max).find(|u| !units.contains(u)) {
                Some(unit) => {
                    units.insert(unit);
                    Ok(unit)
                }
                None => Err(NetifError::UnitExhausted(self.config.name.clone())),
            },
        }
    }

    /// Returns a unit number to the pool.
    pub fn free_unit(&self, unit: u32) {
        self.units.lock().remove(&unit);
    }
}

/// Default transmit: queue to the software send queue when the driver
/// opted in, otherwise hand straight to the output operation.
fn default_transmit(iface: &Interface, packet: Packet) -> Result<()> {
    if iface.driver().config().max_queue_len > 0 {
        iface.enqueue_send(packet)
    } else {
        let ops = iface.ops();
        (ops.output)(iface, packet)
    }
}
