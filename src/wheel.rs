//! Fixed-size timing wheel of suppressed records, bucketed by their
//! estimated reuse time. One slot is evicted per reuse tick, so each
//! suppressed route is re-evaluated only when its own bucket comes up.

use std::mem;

use crate::arena::ListHead;

#[derive(Debug)]
pub(crate) struct ReuseWheel {
    slots: Vec<ListHead>,
    offset: usize,
}

impl ReuseWheel {
    pub(crate) fn new(size: usize) -> Self {
        let size = size.max(1);
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, ListHead::default);
        Self { slots, offset: 0 }
    }

    pub(crate) fn size(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    /// Detach the slot-list at the current offset and advance the wheel
    pub(crate) fn take_current(&mut self) -> ListHead {
        let detached = mem::take(&mut self.slots[self.offset]);
        self.offset = (self.offset + 1) % self.slots.len();
        detached
    }

    /// Absolute slot index `ticks` reuse intervals from now, clamped to
    /// stay within one full rotation
    pub(crate) fn slot_index(&self, ticks: usize) -> usize {
        (self.offset + ticks.min(self.slots.len() - 1)) % self.slots.len()
    }

    pub(crate) fn slot(&self, index: usize) -> &ListHead {
        &self.slots[index]
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut ListHead {
        &mut self.slots[index]
    }

    pub(crate) fn record_count(&self) -> usize {
        self.slots.iter().map(|slot| slot.len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_wraps() {
        let mut wheel = ReuseWheel::new(4);
        for expected in [1usize, 2, 3, 0, 1].iter() {
            wheel.take_current();
            assert_eq!(wheel.offset(), *expected);
        }
    }

    #[test]
    fn test_slot_index_is_relative_to_offset() {
        let mut wheel = ReuseWheel::new(8);
        assert_eq!(wheel.slot_index(3), 3);
        wheel.take_current();
        wheel.take_current();
        assert_eq!(wheel.slot_index(3), 5);
        assert_eq!(wheel.slot_index(7), 1);
        // Offsets past one rotation clamp to the farthest slot
        assert_eq!(wheel.slot_index(100), 1);
    }

    #[test]
    fn test_take_current_empties_slot() {
        let mut wheel = ReuseWheel::new(2);
        wheel.slot_mut(0).head = Some(7);
        wheel.slot_mut(0).len = 1;
        let detached = wheel.take_current();
        assert_eq!(detached.head, Some(7));
        assert!(wheel.slot(0).is_empty());
        assert_eq!(wheel.record_count(), 0);
    }
}
