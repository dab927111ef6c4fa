//! Admission/dispatch scheduler
//!
//! Selects the next executable kernel in head order under the
//! slot-occupancy constraint and the anti-duplication rule, reserves its
//! slots and hands it to the worker pool. All gating state lives behind
//! one service mutex paired with one condition variable; the waiter
//! rechecks every condition after each wake-up because they are mutated
//! independently by the producer, the workers and the monitoring engine.

use std::process;
use std::sync::{Arc, Condvar, Mutex};

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use tessera_shared::types::kernel::{KernelLabel, KernelRecord};
use tessera_shared::utils::time::monotonic_nanos;

use crate::hal::Accelerator;
use crate::output::OutputLog;
use crate::pool::WorkerPool;
use crate::slots::{SlotLiveLists, SlotTable};
use crate::store::KernelStore;

/// Dispatch progress is logged every this many kernels.
const PROGRESS_INTERVAL: usize = 400;

/// Operating mode toggled by the monitoring engine at window boundaries.
/// New dispatches pause during `Train`; running kernels continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Execution,
    Train,
}

struct ServiceState {
    /// Appended-but-not-yet-dispatched records.
    kernels_to_serve: usize,

    /// Hint that a new scan of the pending queue is warranted. Cleared
    /// only at the top of a scan; set on a successful dispatch or by the
    /// producer and completing workers. A dead-end scan leaves it alone so
    /// a concurrent setter is never hidden.
    kernels_may_be_executable: bool,

    free_slots: u32,
    mode: OperatingMode,
    workload_finished: bool,
}

/// Coordination point shared by the producer, the dispatch loop, the
/// worker completion path and the monitoring engine.
pub struct Service {
    state: Mutex<ServiceState>,
    cond: Condvar,
    workload_done: Condvar,

    /// Per-label count of live kernels, under its own lock (lowest in the
    /// lock order; never held together with the service mutex).
    dup: Mutex<Vec<u32>>,
}

impl Service {
    pub fn new(num_slots: u32, num_labels: u32) -> Self {
        Self {
            state: Mutex::new(ServiceState {
                kernels_to_serve: 0,
                kernels_may_be_executable: true,
                free_slots: num_slots,
                mode: OperatingMode::Execution,
                workload_finished: false,
            }),
            cond: Condvar::new(),
            workload_done: Condvar::new(),
            dup: Mutex::new(vec![0; num_labels as usize]),
        }
    }

    /// Producer side: a record landed in the pending queue.
    pub fn note_admitted(&self) {
        let mut state = self.state.lock().unwrap();
        state.kernels_to_serve += 1;
        state.kernels_may_be_executable = true;
        // Only useful to wake the scheduler when it could dispatch.
        if state.free_slots > 0 {
            self.cond.notify_one();
        }
    }

    /// Worker completion side: slots came back, duplicated labels may run.
    pub fn note_completed(&self, cu: u32) {
        let mut state = self.state.lock().unwrap();
        state.free_slots += cu;
        state.kernels_may_be_executable = true;
        self.cond.notify_one();
    }

    pub fn free_slots(&self) -> u32 {
        self.state.lock().unwrap().free_slots
    }

    pub fn mode(&self) -> OperatingMode {
        self.state.lock().unwrap().mode
    }

    /// Monitoring engine: transition at a window boundary. Entering
    /// `Execution` wakes the dispatch loop.
    pub fn set_mode(&self, mode: OperatingMode) {
        let mut state = self.state.lock().unwrap();
        state.mode = mode;
        if mode == OperatingMode::Execution {
            self.cond.notify_all();
        }
    }

    /// Snapshot of the per-label live counts for one scan.
    pub fn dup_snapshot(&self) -> Vec<u32> {
        self.dup.lock().unwrap().clone()
    }

    fn dup_inc(&self, label: KernelLabel) {
        self.dup.lock().unwrap()[label.index()] += 1;
    }

    fn dup_dec(&self, label: KernelLabel) {
        let mut dup = self.dup.lock().unwrap();
        let count = &mut dup[label.index()];
        *count = count.saturating_sub(1);
    }

    fn signal_workload_finished(&self) {
        let mut state = self.state.lock().unwrap();
        state.workload_finished = true;
        self.workload_done.notify_all();
    }

    /// Producer side: block until the scheduler has drained the current
    /// workload, then rearm the flag for the next one.
    pub fn wait_workload_finished(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.workload_finished {
            state = self.workload_done.wait(state).unwrap();
        }
        state.workload_finished = false;
    }
}

/// The dispatch loop and the completion path run by workers.
pub struct Scheduler {
    service: Arc<Service>,
    store: Arc<KernelStore>,
    slots: Arc<SlotTable>,
    live: Arc<SlotLiveLists>,
    output: Arc<OutputLog>,
    pool: Arc<WorkerPool>,
    hal: Arc<dyn Accelerator>,
    num_kernels: usize,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: Arc<Service>,
        store: Arc<KernelStore>,
        slots: Arc<SlotTable>,
        live: Arc<SlotLiveLists>,
        output: Arc<OutputLog>,
        pool: Arc<WorkerPool>,
        hal: Arc<dyn Accelerator>,
        num_kernels: usize,
    ) -> Self {
        Self {
            service,
            store,
            slots,
            live,
            output,
            pool,
            hal,
            num_kernels,
        }
    }

    /// Run the dispatch loop for `num_workloads` workloads of
    /// `num_kernels` each, then return.
    pub fn run(&self, num_workloads: usize) -> Result<()> {
        for workload in 0..num_workloads {
            info!("[SCHED] workload #{workload} started");
            let started = monotonic_nanos();

            let mut admitted = 0;
            while admitted < self.num_kernels {
                let free_now = {
                    let mut state = self.service.state.lock().unwrap();
                    while state.kernels_to_serve == 0
                        || !state.kernels_may_be_executable
                        || state.free_slots == 0
                        || state.mode == OperatingMode::Train
                    {
                        state = self.service.cond.wait(state).unwrap();
                    }
                    // Cleared here and only here; see ServiceState.
                    state.kernels_may_be_executable = false;
                    state.free_slots
                };

                let dup_now = self.service.dup_snapshot();
                let Some(record) = self
                    .store
                    .scan_and_remove_first_executable(free_now, &dup_now)
                else {
                    // Dead end: leave the flag to whatever a concurrent
                    // producer or worker set it to, and retry.
                    debug!("[SCHED] no executable kernel among {} pending", self.store.len());
                    continue;
                };

                self.dispatch_record(record)?;

                admitted += 1;
                if admitted % PROGRESS_INTERVAL == 0 {
                    info!(
                        "[SCHED] workload #{workload}: {admitted}/{} kernels dispatched",
                        self.num_kernels
                    );
                }
            }

            // Workload drained: wait for in-flight kernels, then hand the
            // producer the floor for the next one.
            self.store.clear();
            self.pool.wait_idle();

            let elapsed_s = (monotonic_nanos() - started) as f64 / 1e9;
            info!("[SCHED] workload #{workload} finished in {elapsed_s:.3}s");
            self.service.signal_workload_finished();
        }
        Ok(())
    }

    /// Reserve slots for one record and hand it to the pool.
    fn dispatch_record(&self, record: Arc<KernelRecord>) -> Result<()> {
        // More executable records may remain behind this one.
        {
            let mut state = self.service.state.lock().unwrap();
            state.kernels_may_be_executable = true;
        }

        self.service.dup_inc(record.label);

        {
            let mut state = self.service.state.lock().unwrap();
            state.free_slots = state.free_slots.checked_sub(record.cu).with_context(|| {
                format!(
                    "[SCHED] free-slot count underflow dispatching kernel #{}",
                    record.id
                )
            })?;
        }

        let mask = self
            .slots
            .allocate(record.cu)
            .with_context(|| format!("[SCHED] slot assignment for kernel #{}", record.id))?;
        record.set_slot_mask(mask);
        debug!(
            "[SCHED] kernel #{} label {} cu {} -> mask {mask:#04x}",
            record.id, record.label.0, record.cu
        );

        self.output.push(record.clone());

        let job_record = record.clone();
        let service = self.service.clone();
        let slots = self.slots.clone();
        let live = self.live.clone();
        let hal = self.hal.clone();
        self.pool.dispatch(move || {
            if let Err(err) = execute_and_release(&job_record, &*hal, &live, &slots, &service) {
                // The dispatched kernel's contract with the slot table and
                // the duplication rule cannot be partially unwound.
                error!("[EXEC] kernel #{}: {err:#}", job_record.id);
                process::exit(1);
            }
        })?;

        let mut state = self.service.state.lock().unwrap();
        state.kernels_to_serve -= 1;
        Ok(())
    }
}

/// Execution routine run by a pool worker: drive the accelerator, then
/// return the kernel's resources and wake the dispatch loop.
fn execute_and_release(
    record: &Arc<KernelRecord>,
    hal: &dyn Accelerator,
    live: &SlotLiveLists,
    slots: &SlotTable,
    service: &Service,
) -> Result<()> {
    record.mark_pre_exec(monotonic_nanos());

    // Registration precedes the arrival timestamp so the windowing
    // predicate sees the kernel the moment it can overlap a window.
    live.register(record);
    record.mark_arrival(monotonic_nanos());

    hal.execute_kernel(record.label, record.cu, record.slot_mask(), record.executions)
        .with_context(|| format!("accelerator execution (label {})", record.label.0))?;

    record.mark_finish(monotonic_nanos());
    record.mark_post_exec(monotonic_nanos());

    // The table is released; the record keeps its assignment for the
    // final report.
    slots.release(record.slot_mask());
    service.dup_dec(record.label);
    service.note_completed(record.cu);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dup_counts_round_trip() {
        let service = Service::new(8, 4);
        service.dup_inc(KernelLabel(2));
        assert_eq!(service.dup_snapshot(), vec![0, 0, 1, 0]);
        service.dup_dec(KernelLabel(2));
        assert_eq!(service.dup_snapshot(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_note_completed_restores_slots() {
        let service = Service::new(8, 1);
        {
            let mut state = service.state.lock().unwrap();
            state.free_slots -= 5;
        }
        service.note_completed(5);
        assert_eq!(service.free_slots(), 8);
    }

    #[test]
    fn test_mode_transitions() {
        let service = Service::new(8, 1);
        assert_eq!(service.mode(), OperatingMode::Execution);
        service.set_mode(OperatingMode::Train);
        assert_eq!(service.mode(), OperatingMode::Train);
        service.set_mode(OperatingMode::Execution);
        assert_eq!(service.mode(), OperatingMode::Execution);
    }

    #[test]
    fn test_workload_finished_handshake() {
        let service = Arc::new(Service::new(8, 1));
        let signaller = service.clone();
        let handle = std::thread::spawn(move || {
            signaller.signal_workload_finished();
        });
        service.wait_workload_finished();
        handle.join().unwrap();
        // Flag rearmed for the next workload.
        assert!(!service.state.lock().unwrap().workload_finished);
    }
}
