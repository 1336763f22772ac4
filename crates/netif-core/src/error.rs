//! Error types for the interface subsystem.

use netif_types::NetAddress;
use thiserror::Error;

/// Errors that can occur in interface lifecycle and membership
/// operations.
///
/// Validation and not-found conditions are reported to the caller and
/// leave no state behind. Contract violations between a driver and the
/// subsystem (wrong attach-args version, conflicting queue options) are
/// programming errors and panic instead of taking this form.
#[derive(Debug, Error)]
pub enum NetifError {
    /// An interface with the requested name already exists.
    #[error("interface name '{0}' already in use")]
    NameExists(String),

    /// No interface with the given name or index.
    #[error("interface '{0}' not found")]
    NotFound(String),

    /// The interface has started detaching; no new operations are
    /// admitted.
    #[error("interface '{0}' is detaching")]
    Dying(String),

    /// Operation reached a detached interface through a stale handle.
    #[error("interface is detached")]
    Dead,

    /// A rename is already in progress on this interface.
    #[error("interface '{0}' is being renamed")]
    RenameInProgress(String),

    /// Invalid name or address syntax.
    #[error(transparent)]
    Parse(#[from] netif_types::ParseError),

    /// Group names ending in a digit are reserved for unit-numbered
    /// interface names.
    #[error("group name '{0}' is reserved (must not end in a digit)")]
    ReservedGroupName(String),

    /// The interface is already a member of the group.
    #[error("already a member of group '{0}'")]
    AlreadyMember(String),

    /// The interface is not a member of the group.
    #[error("not a member of group '{0}'")]
    NotAMember(String),

    /// The multicast address is not joined on this interface.
    #[error("multicast address {0} not joined")]
    MulticastNotFound(NetAddress),

    /// Multicast address could not be resolved to a link-layer group.
    #[error("cannot resolve {0} to a link-layer multicast address")]
    ResolveFailed(NetAddress),

    /// All unit numbers of a cloning driver are taken.
    #[error("no free unit for driver '{0}'")]
    UnitExhausted(String),

    /// The requested unit number is already allocated.
    #[error("unit {unit} of driver '{driver}' is busy")]
    UnitBusy { driver: String, unit: u32 },

    /// The software send queue is full.
    #[error("send queue full on '{0}'")]
    QueueFull(String),

    /// Error reported by a driver operation.
    #[error("driver error: {0}")]
    Driver(String),
}

/// Result type alias for interface subsystem operations.
pub type Result<T> = std::result::Result<T, NetifError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            NetifError::NameExists("eth0".into()).to_string(),
            "interface name 'eth0' already in use"
        );
        assert_eq!(
            NetifError::ReservedGroupName("eth1".into()).to_string(),
            "group name 'eth1' is reserved (must not end in a digit)"
        );
        let addr: NetAddress = "224.0.0.1".parse::<std::net::Ipv4Addr>().unwrap().into();
        assert_eq!(
            NetifError::MulticastNotFound(addr).to_string(),
            "multicast address 224.0.0.1 not joined"
        );
    }
}
