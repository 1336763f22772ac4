//! Network interface subsystem.
//!
//! This crate manages the lifetime of network interfaces inside a
//! [`NetStack`]: creation and teardown, the index table mapping small
//! integers to interfaces, per-interface address lists and multicast
//! memberships, named interface groups, and deferred link-state
//! announcements.
//!
//! Drivers describe themselves with a [`driver::DriverConfig`]; the
//! first attach freezes ("blesses") the operation table, merging in
//! per-kind defaults such as [`driver::TypeDefaults::ethernet`].
//! Interfaces are handed out as `Arc<Interface>`: a handle obtained
//! from a lookup stays readable for as long as it is held, even after
//! the interface detaches — detached interfaces answer lookups with
//! nothing and fail every driver operation.
//!
//! ```
//! use netif_core::driver::{DriverConfig, Driver, IfKind};
//! use netif_core::stack::{AttachArgs, NetStack};
//! use std::sync::Arc;
//!
//! let mut config = DriverConfig::new("em", IfKind::Ethernet);
//! config.ops.input = Some(Arc::new(|_, _| Ok(())));
//! config.ops.output = Some(Arc::new(|_, _| Ok(())));
//! config.ops.ioctl = Some(Arc::new(|_, _| Ok(())));
//!
//! let stack = NetStack::new();
//! let em0 = stack.attach(AttachArgs::new(Driver::new(config))).unwrap();
//! assert_eq!(em0.name(), "em0");
//! ```

pub mod addr;
pub mod driver;
pub mod error;
pub mod event;
pub mod group;
pub mod iface;
mod index;
pub mod linkstate;
pub mod multicast;
pub mod stack;

pub use addr::{AddressEntry, RedundancyRole};
pub use driver::{Driver, DriverConfig, DriverOps, IfKind, IfOps, IfRequest, TypeDefaults};
pub use error::{NetifError, Result};
pub use event::{Event, EventRecorder, EventRegistry, EventSink};
pub use group::Group;
pub use iface::{IfCounter, IfFlags, IfState, Interface, Packet, PacketTap};
pub use linkstate::LinkState;
pub use multicast::MulticastEntry;
pub use stack::{AttachArgs, Domain, NetStack, ALL_GROUP, ATTACH_VERSION};
