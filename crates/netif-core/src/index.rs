//! The interface index table.
//!
//! Maps small integer indices to attached interfaces. Index 0 is never
//! used. Allocation takes the lowest free slot at or below the
//! high-water mark, growing the table by doubling when the next index
//! would run off the end. Freeing eagerly shrinks the high-water mark
//! past trailing empty slots so scans stay bounded; capacity itself
//! never shrinks.
//!
//! Reservation is split from publication: `reserve` leaves a sentinel
//! that lookups treat as absent, and `bind` publishes the interface
//! only once it is fully constructed. The table itself is not
//! synchronized; it lives under the stack's read-mostly lock.

use crate::iface::Interface;
use std::sync::Arc;

const INITIAL_CAPACITY: usize = 8;

enum Slot {
    Empty,
    /// Index allocated, object still under construction.
    Reserved,
    Bound(Arc<Interface>),
}

impl Slot {
    fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }
}

pub(crate) struct IndexTable {
    slots: Vec<Slot>,
    /// Highest index currently in use.
    last: u32,
}

impl IndexTable {
    pub(crate) fn new() -> IndexTable {
        let mut slots = Vec::with_capacity(INITIAL_CAPACITY);
        slots.resize_with(INITIAL_CAPACITY, || Slot::Empty);
        IndexTable { slots, last: 0 }
    }

    /// Allocates the lowest free index, growing the table if needed.
    pub(crate) fn reserve(&mut self) -> u32 {
        loop {
            let mut idx = self.last + 1;
            for i in 1..=self.last {
                if self.slots[i as usize].is_empty() {
                    idx = i;
                    break;
                }
            }
            if idx as usize >= self.slots.len() {
                self.grow();
                continue;
            }
            if idx > self.last {
                self.last = idx;
            }
            self.slots[idx as usize] = Slot::Reserved;
            return idx;
        }
    }

    fn grow(&mut self) {
        let new_len = self.slots.len() * 2;
        self.slots.resize_with(new_len, || Slot::Empty);
    }

    /// Publishes a fully constructed interface under a reserved index.
    pub(crate) fn bind(&mut self, index: u32, iface: Arc<Interface>) {
        debug_assert!(
            matches!(self.slots[index as usize], Slot::Reserved),
            "bind of index {index} that was not reserved"
        );
        self.slots[index as usize] = Slot::Bound(iface);
    }

    /// Frees an index, reserved or bound, and pulls the high-water mark
    /// down past trailing empty slots.
    pub(crate) fn release(&mut self, index: u32) {
        self.slots[index as usize] = Slot::Empty;
        while self.last > 0 && self.slots[self.last as usize].is_empty() {
            self.last -= 1;
        }
    }

    /// Fetches the interface bound at `index`. Reserved and empty slots
    /// read as absent.
    pub(crate) fn lookup(&self, index: u32) -> Option<&Arc<Interface>> {
        if index == 0 || index > self.last {
            return None;
        }
        match &self.slots[index as usize] {
            Slot::Bound(iface) => Some(iface),
            _ => None,
        }
    }

    /// Highest index currently in use.
    pub(crate) fn last_index(&self) -> u32 {
        self.last
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::tests::test_driver;
    use crate::iface::IfFlags;
    use pretty_assertions::assert_eq;

    fn iface(name: &str) -> Arc<Interface> {
        let driver = test_driver("tst", 0);
        let ops = driver.bless(None);
        Interface::new(
            driver,
            ops,
            name.parse().unwrap(),
            None,
            IfFlags::empty(),
            1500,
            0,
        )
    }

    #[test]
    fn test_reserve_starts_at_one() {
        let mut table = IndexTable::new();
        assert_eq!(table.reserve(), 1);
        assert_eq!(table.reserve(), 2);
        assert_eq!(table.last_index(), 2);
    }

    #[test]
    fn test_reserved_slot_reads_as_absent() {
        let mut table = IndexTable::new();
        let idx = table.reserve();
        assert!(table.lookup(idx).is_none());
        table.bind(idx, iface("a0"));
        assert!(table.lookup(idx).is_some());
    }

    #[test]
    fn test_lookup_out_of_range() {
        let table = IndexTable::new();
        assert!(table.lookup(0).is_none());
        assert!(table.lookup(1).is_none());
        assert!(table.lookup(1000).is_none());
    }

    #[test]
    fn test_release_reuses_lowest() {
        let mut table = IndexTable::new();
        for i in 1..=4 {
            let idx = table.reserve();
            assert_eq!(idx, i);
            table.bind(idx, iface("a0"));
        }
        table.release(2);
        // High-water mark stays: 2 is not a trailing slot.
        assert_eq!(table.last_index(), 4);
        assert_eq!(table.reserve(), 2);
    }

    #[test]
    fn test_high_water_mark_shrinks_past_trailing_holes() {
        let mut table = IndexTable::new();
        for _ in 1..=4 {
            let idx = table.reserve();
            table.bind(idx, iface("a0"));
        }
        table.release(3);
        assert_eq!(table.last_index(), 4);
        table.release(4);
        // Both trailing holes are skipped.
        assert_eq!(table.last_index(), 2);
    }

    #[test]
    fn test_grow_on_ninth_reserve() {
        let mut table = IndexTable::new();
        assert_eq!(table.capacity(), 8);
        for i in 1..=9 {
            let idx = table.reserve();
            assert_eq!(idx, i);
            table.bind(idx, iface("a0"));
        }
        // Index 8 no longer fit in the initial 8-slot table (slot 0 is
        // unused), so exactly one doubling happened.
        assert_eq!(table.capacity(), 16);
        assert_eq!(table.last_index(), 9);
        for i in 1..=9 {
            assert!(table.lookup(i).is_some());
        }
    }

    #[test]
    fn test_capacity_never_shrinks() {
        let mut table = IndexTable::new();
        let mut reserved = Vec::new();
        for _ in 1..=9 {
            reserved.push(table.reserve());
        }
        for idx in reserved {
            table.release(idx);
        }
        assert_eq!(table.last_index(), 0);
        assert_eq!(table.capacity(), 16);
    }
}
