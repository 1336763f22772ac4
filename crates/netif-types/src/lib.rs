//! Common types for the netif interface subsystem.
//!
//! This crate provides type-safe representations of the network
//! primitives the generic interface layer is built on:
//!
//! - [`MacAddress`]: 48-bit hardware addresses
//! - [`NetAddress`]: a protocol or link-layer address with family-aware
//!   comparison and prefix matching
//! - [`LinkAddress`]: the link-layer address entry bound to every
//!   interface (name label, index, hardware bytes)
//! - [`InterfaceName`]: validated interface names
//! - [`AddressFamily`]: address family tags

mod addr;
mod link;
mod mac;
mod name;

pub use addr::{AddressFamily, NetAddress};
pub use link::LinkAddress;
pub use mac::MacAddress;
pub use name::{InterfaceName, IF_NAME_SIZE};

/// Common error type for parsing and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid interface name: {0}")]
    InvalidInterfaceName(String),

    #[error("interface name too long: {0} (max {IF_NAME_SIZE} bytes)")]
    InterfaceNameTooLong(String),
}
