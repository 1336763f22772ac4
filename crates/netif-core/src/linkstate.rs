//! Deferred link-state change notification.
//!
//! Drivers report link transitions from contexts that may hold their
//! own locks, so the notification is never delivered inline: the
//! interface is queued to a dedicated worker thread which fires the
//! [`Event::LinkStateChanged`] notification with the *final* observed
//! state. Rapid toggles coalesce into a single delivery carrying the
//! number of collapsed transitions. Detach uses [`LinkTask::drain`] as
//! a hard barrier before tearing the interface down.

use crate::event::{Event, EventRegistry};
use crate::iface::Interface;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// Carrier state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LinkState {
    /// Driver has not reported a state yet.
    Unknown = 0,
    /// Carrier is down.
    Down = 1,
    /// Carrier is up.
    Up = 2,
}

impl LinkState {
    pub(crate) fn from_u8(v: u8) -> LinkState {
        match v {
            1 => LinkState::Down,
            2 => LinkState::Up,
            _ => LinkState::Unknown,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Unknown => write!(f, "unknown"),
            LinkState::Down => write!(f, "down"),
            LinkState::Up => write!(f, "up"),
        }
    }
}

#[derive(Default)]
struct TaskInner {
    /// Transitions recorded since the worker last picked the task up.
    pending: u32,
    /// Task is sitting in the worker queue.
    queued: bool,
    /// Worker is currently delivering the notification.
    running: bool,
}

/// Per-interface single-slot deferred task state.
///
/// The slot holds no payload of its own; the payload is the
/// interface's current link state, read by the worker when it gets to
/// the task (latest value wins).
#[derive(Default)]
pub struct LinkTask {
    inner: Mutex<TaskInner>,
    cond: Condvar,
}

impl LinkTask {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records one transition. Returns true if the task was idle and
    /// must be handed to the worker.
    pub(crate) fn note(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.pending += 1;
        if inner.queued {
            false
        } else {
            inner.queued = true;
            true
        }
    }

    /// Worker-side: claims all pending transitions, returns the count.
    pub(crate) fn begin(&self) -> u32 {
        let mut inner = self.inner.lock();
        let n = inner.pending;
        inner.pending = 0;
        inner.queued = false;
        inner.running = true;
        n
    }

    /// Worker-side: delivery finished.
    pub(crate) fn finish(&self) {
        let mut inner = self.inner.lock();
        inner.running = false;
        self.cond.notify_all();
    }

    /// Blocks until no delivery is queued or in flight.
    ///
    /// This is the detach barrier: once it returns, and no further
    /// transitions are reported, the worker will not touch the
    /// interface again.
    pub fn drain(&self) {
        let mut inner = self.inner.lock();
        while inner.pending > 0 || inner.queued || inner.running {
            self.cond.wait(&mut inner);
        }
    }
}

/// The background worker owning link-state notification delivery.
pub(crate) struct LinkWorker {
    tx: Mutex<Option<mpsc::Sender<Arc<Interface>>>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LinkWorker {
    /// Spawns the worker thread. Worker lifetime is tied to the owning
    /// stack; dropping the stack shuts it down.
    pub(crate) fn spawn(events: Arc<EventRegistry>) -> Self {
        let (tx, rx) = mpsc::channel::<Arc<Interface>>();
        let handle = thread::Builder::new()
            .name("netif-linkstate".into())
            .spawn(move || {
                while let Ok(iface) = rx.recv() {
                    deliver(&events, &iface);
                }
            })
            .expect("failed to spawn link-state worker thread");
        LinkWorker {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Hands an interface with a freshly armed task to the worker.
    pub(crate) fn enqueue(&self, iface: Arc<Interface>) {
        let tx = self.tx.lock();
        if let Some(tx) = tx.as_ref() {
            // A send error means the worker is gone, which only
            // happens during stack teardown; the drain barrier cannot
            // be waiting at that point.
            let _ = tx.send(iface);
        }
    }

    /// Stops the worker and waits for it to exit.
    pub(crate) fn shutdown(&self) {
        self.tx.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

fn deliver(events: &EventRegistry, iface: &Arc<Interface>) {
    let coalesced = iface.link_task().begin();
    let state = iface.link_state();
    let name = iface.name().to_string();
    if coalesced > 1 {
        log::info!("{name}: {coalesced} link states coalesced");
    }
    log::info!("{name}: link state changed to {state}");
    events.fire(Event::LinkStateChanged {
        name,
        state,
        coalesced,
    });
    iface.link_task().finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_note_arms_once() {
        let task = LinkTask::new();
        assert!(task.note());
        assert!(!task.note());
        assert!(!task.note());
        assert_eq!(task.begin(), 3);
        task.finish();
        // After the worker finished, the slot is re-armable.
        assert!(task.note());
        assert_eq!(task.begin(), 1);
        task.finish();
    }

    #[test]
    fn test_drain_on_idle_task_returns() {
        let task = LinkTask::new();
        task.drain();
    }

    #[test]
    fn test_drain_waits_for_worker() {
        let task = Arc::new(LinkTask::new());
        assert!(task.note());
        task.begin();

        let t = {
            let task = task.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                task.finish();
            })
        };
        // Returns only once finish() ran.
        task.drain();
        t.join().unwrap();
    }

    #[test]
    fn test_link_state_display() {
        assert_eq!(LinkState::Up.to_string(), "up");
        assert_eq!(LinkState::Down.to_string(), "down");
        assert_eq!(LinkState::from_u8(7), LinkState::Unknown);
    }
}
