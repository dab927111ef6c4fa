//! Kernel-record store (pending queue)
//!
//! Owns every admitted record between admission and dispatch. A single
//! lock serializes the head-order scan against concurrent appends, so a
//! "no executable found" verdict can never race with a freshly appended
//! record: whoever appends after the scan also lifts the scheduler's
//! wake-up flag.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tessera_shared::types::kernel::KernelRecord;

/// Ordered queue of records awaiting dispatch. Insertion at the tail by
/// the producer; removal through the first-executable scan only.
pub struct KernelStore {
    pending: Mutex<VecDeque<Arc<KernelRecord>>>,
}

impl KernelStore {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a record and return the shared handle the rest of the
    /// runtime keeps referring to.
    pub fn append(&self, record: KernelRecord) -> Arc<KernelRecord> {
        let record = Arc::new(record);
        self.pending.lock().unwrap().push_back(record.clone());
        record
    }

    /// Remove and return the first record from the head satisfying
    /// `cu <= free_slots` and `dup[label] == 0`, or `None` when the scan
    /// reaches the tail without a match.
    pub fn scan_and_remove_first_executable(
        &self,
        free_slots: u32,
        dup: &[u32],
    ) -> Option<Arc<KernelRecord>> {
        let mut pending = self.pending.lock().unwrap();
        let pos = pending
            .iter()
            .position(|r| r.cu <= free_slots && dup[r.label.index()] == 0)?;
        pending.remove(pos)
    }

    /// Number of records still awaiting dispatch.
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything still pending (end-of-workload cleanup).
    pub fn clear(&self) {
        self.pending.lock().unwrap().clear();
    }

    /// Take every pending record out, preserving order (final flush).
    pub fn drain(&self) -> Vec<Arc<KernelRecord>> {
        self.pending.lock().unwrap().drain(..).collect()
    }
}

impl Default for KernelStore {
    fn default() -> Self {
        Self::new()
    }
}
