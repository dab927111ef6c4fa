//! Accelerator HAL seam
//!
//! The accelerator is opaque to the workload manager: a bounded-time
//! routine taking the kernel label, its width, the slot mask it was
//! assigned and the bundled execution count. The shipped implementation
//! simulates the nominal execution time of the reference hardware.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use tessera_shared::types::kernel::KernelLabel;

/// Opaque accelerator invocation. Blocks until the kernel completes.
pub trait Accelerator: Send + Sync {
    fn execute_kernel(
        &self,
        label: KernelLabel,
        cu: u32,
        slot_mask: u32,
        executions: u32,
    ) -> Result<()>;
}

/// Stand-in accelerator sleeping for the reference nominal time of
/// 7–11 ms per invocation, drawn from a seeded generator so runs are
/// reproducible.
pub struct SimulatedAccelerator {
    rng: Mutex<ChaCha8Rng>,
}

impl SimulatedAccelerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
}

impl Accelerator for SimulatedAccelerator {
    fn execute_kernel(
        &self,
        _label: KernelLabel,
        _cu: u32,
        _slot_mask: u32,
        _executions: u32,
    ) -> Result<()> {
        let ms = self.rng.lock().unwrap().gen_range(7..11);
        thread::sleep(Duration::from_millis(ms));
        Ok(())
    }
}
