//! Subsystem event notification.
//!
//! The stack announces lifecycle transitions to registered sinks:
//! interface arrival and departure, link-state transitions, and group
//! registry changes. Delivery is synchronous and in registration
//! order; sinks must not call back into structural operations.

use crate::linkstate::LinkState;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// A subsystem notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Interface fully attached and visible by index and name.
    Arrival { name: String, index: u32 },
    /// Interface unlinked; read-only accessors are still safe, the
    /// operation table and index are about to go away.
    Departure { name: String, index: u32 },
    /// Deferred link-state notification. `coalesced` counts how many
    /// raw transitions collapsed into this delivery.
    LinkStateChanged {
        name: String,
        state: LinkState,
        coalesced: u32,
    },
    /// First member joined a previously unknown group.
    GroupCreated { group: String },
    /// Last member left; the group is gone from the registry.
    GroupDestroyed { group: String },
    /// Some interface joined or left the group.
    GroupChanged { group: String },
}

/// Receives subsystem events.
pub trait EventSink: Send + Sync {
    /// Called once per event, synchronously with the emitting
    /// operation.
    fn deliver(&self, event: &Event);
}

/// Registry of event sinks.
///
/// Firing iterates a snapshot of the registered sinks so a sink may
/// register further sinks without deadlocking.
#[derive(Default)]
pub struct EventRegistry {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink. Sinks cannot be removed; they live as long as
    /// the stack.
    pub fn register(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Delivers `event` to every registered sink.
    pub fn fire(&self, event: Event) {
        log::debug!("event: {event:?}");
        let sinks = self.sinks.read().clone();
        for sink in sinks {
            sink.deliver(&event);
        }
    }
}

/// An [`EventSink`] that records everything it sees.
///
/// Used by the test suites and useful as a diagnostic tap.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Drops all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for EventRecorder {
    fn deliver(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_recorder_captures_in_order() {
        let registry = EventRegistry::new();
        let recorder = EventRecorder::new();
        registry.register(recorder.clone());

        registry.fire(Event::GroupCreated {
            group: "all".into(),
        });
        registry.fire(Event::GroupChanged {
            group: "all".into(),
        });

        assert_eq!(
            recorder.events(),
            vec![
                Event::GroupCreated {
                    group: "all".into()
                },
                Event::GroupChanged {
                    group: "all".into()
                },
            ]
        );
    }

    #[test]
    fn test_multiple_sinks_all_see_event() {
        let registry = EventRegistry::new();
        let a = EventRecorder::new();
        let b = EventRecorder::new();
        registry.register(a.clone());
        registry.register(b.clone());

        registry.fire(Event::GroupDestroyed {
            group: "wan".into(),
        });

        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events(), a.events());
    }

    #[test]
    fn test_count_filter() {
        let recorder = EventRecorder::new();
        let registry = EventRegistry::new();
        registry.register(recorder.clone());
        registry.fire(Event::GroupChanged { group: "a".into() });
        registry.fire(Event::GroupChanged { group: "b".into() });
        registry.fire(Event::GroupCreated { group: "b".into() });

        assert_eq!(
            recorder.count(|e| matches!(e, Event::GroupChanged { .. })),
            2
        );
    }
}
