//! Slot occupancy and per-slot live lists
//!
//! The slot table tracks which of the fixed hardware slots are held and
//! assigns free ones to a dispatched kernel, deterministically from the
//! lowest index. The live lists record, per slot, which kernels are
//! currently executing there; the monitoring engine consumes them under
//! the per-slot lock to attribute kernels to each window.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tessera_shared::types::kernel::KernelRecord;

/// Fixed occupancy table over the hardware slots.
pub struct SlotTable {
    in_use: Mutex<Vec<bool>>,
}

impl SlotTable {
    pub fn new(num_slots: u32) -> Self {
        Self {
            in_use: Mutex::new(vec![false; num_slots as usize]),
        }
    }

    /// Mark the first `cu` free slots busy and return their bitmask.
    ///
    /// The caller has already reserved the width against `free_slots`, so
    /// finding fewer free bits than `cu` is an invariant violation.
    pub fn allocate(&self, cu: u32) -> Result<u32> {
        let mut in_use = self.in_use.lock().unwrap();
        let mut mask = 0u32;
        let mut found = 0u32;
        for (i, slot) in in_use.iter_mut().enumerate() {
            if !*slot {
                *slot = true;
                mask |= 1 << i;
                found += 1;
                if found == cu {
                    return Ok(mask);
                }
            }
        }
        anyhow::bail!("[SCHED] slot table holds {found} free slots, {cu} requested");
    }

    /// Clear every slot named by `mask`.
    pub fn release(&self, mask: u32) {
        let mut in_use = self.in_use.lock().unwrap();
        for (i, slot) in in_use.iter_mut().enumerate() {
            if mask & (1 << i) != 0 {
                *slot = false;
            }
        }
    }

    /// Number of slots currently held.
    pub fn occupied(&self) -> u32 {
        self.in_use.lock().unwrap().iter().filter(|s| **s).count() as u32
    }
}

/// One unordered list of live kernel records per slot, each behind its own
/// lock. A worker registers its record on every slot of the kernel's mask
/// before the accelerator clock starts; only the monitoring engine removes
/// entries, re-enqueueing the ones still live past the window.
pub struct SlotLiveLists {
    lists: Vec<Mutex<VecDeque<Arc<KernelRecord>>>>,
}

impl SlotLiveLists {
    pub fn new(num_slots: u32) -> Self {
        Self {
            lists: (0..num_slots).map(|_| Mutex::new(VecDeque::new())).collect(),
        }
    }

    pub fn num_slots(&self) -> usize {
        self.lists.len()
    }

    /// Register a dispatched record on every slot its mask covers.
    pub fn register(&self, record: &Arc<KernelRecord>) {
        let mask = record.slot_mask();
        for (slot, list) in self.lists.iter().enumerate() {
            if mask & (1 << slot) != 0 {
                list.lock().unwrap().push_back(record.clone());
            }
        }
    }

    /// Take every record currently on slot `slot`'s list.
    pub fn drain_slot(&self, slot: usize) -> Vec<Arc<KernelRecord>> {
        self.lists[slot].lock().unwrap().drain(..).collect()
    }

    /// Put records still live past the current window back on the list.
    pub fn requeue(&self, slot: usize, records: Vec<Arc<KernelRecord>>) {
        self.lists[slot].lock().unwrap().extend(records);
    }

    pub fn len(&self, slot: usize) -> usize {
        self.lists[slot].lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_shared::types::kernel::KernelLabel;

    #[test]
    fn test_allocate_low_index_first() {
        let table = SlotTable::new(8);
        assert_eq!(table.allocate(2).unwrap(), 0b0000_0011);
        assert_eq!(table.allocate(1).unwrap(), 0b0000_0100);
        assert_eq!(table.occupied(), 3);
    }

    #[test]
    fn test_release_reopens_slots() {
        let table = SlotTable::new(4);
        let mask = table.allocate(4).unwrap();
        assert_eq!(mask, 0b1111);
        table.release(0b0101);
        assert_eq!(table.occupied(), 2);
        // Freed low slots are handed out again first.
        assert_eq!(table.allocate(2).unwrap(), 0b0101);
    }

    #[test]
    fn test_allocation_exclusivity() {
        let table = SlotTable::new(8);
        let a = table.allocate(3).unwrap();
        let b = table.allocate(3).unwrap();
        assert_eq!(a & b, 0);
    }

    #[test]
    fn test_over_allocation_is_invariant_error() {
        let table = SlotTable::new(2);
        table.allocate(2).unwrap();
        assert!(table.allocate(1).is_err());
    }

    #[test]
    fn test_register_follows_mask() {
        let lists = SlotLiveLists::new(4);
        let record = Arc::new(KernelRecord::new(0, KernelLabel(1), 1, 2, 0, 0));
        record.set_slot_mask(0b1010);
        lists.register(&record);

        assert_eq!(lists.len(0), 0);
        assert_eq!(lists.len(1), 1);
        assert_eq!(lists.len(2), 0);
        assert_eq!(lists.len(3), 1);
    }

    #[test]
    fn test_drain_and_requeue() {
        let lists = SlotLiveLists::new(2);
        let record = Arc::new(KernelRecord::new(0, KernelLabel(0), 1, 1, 0, 0));
        record.set_slot_mask(0b01);
        lists.register(&record);

        let drained = lists.drain_slot(0);
        assert_eq!(drained.len(), 1);
        assert_eq!(lists.len(0), 0);

        lists.requeue(0, drained);
        assert_eq!(lists.len(0), 1);
    }
}
