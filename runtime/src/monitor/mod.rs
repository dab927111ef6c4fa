//! Monitoring engine
//!
//! A single thread scheduled against absolute monotonic deadlines: every
//! period it drives one hardware acquisition, stamps the window bounds,
//! writes the power/traces/online streams into the current ring segment
//! and advances the ring. At every `measurements_per_training`-th window
//! it pauses dispatch, hands the phase to the model service and honors a
//! commanded idle before resuming the cadence.

pub mod cpu;
pub mod hw;
pub mod online;
pub mod ring;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{info, warn};

use tessera_shared::types::monitor::MonitorWindow;
use tessera_shared::utils::time::{millis_to_nanos, monotonic_nanos, sleep_until};

use crate::models::ModelClient;
use crate::sched::{OperatingMode, Service};
use crate::slots::SlotLiveLists;

use self::cpu::CpuUsageMonitor;
use self::hw::MonitorHardware;
use self::ring::RingBuffers;

/// Timing and cadence parameters of the engine.
#[derive(Debug, Clone)]
pub struct MonitorArgs {
    /// Application epoch stamped into every window.
    pub initial_time: i64,

    /// Window period in ms.
    pub period_ms: u64,

    /// Windows per training phase.
    pub measurements_per_training: u32,

    /// Delay before the first window, in ms.
    pub startup_delay_ms: u64,

    /// Observations-per-window factor for commanded idles.
    pub obs_per_window: f32,
}

/// The monitoring loop and its collaborators.
pub struct MonitorEngine {
    args: MonitorArgs,
    hardware: Box<dyn MonitorHardware>,
    ring: RingBuffers,
    live: Arc<SlotLiveLists>,
    service: Arc<Service>,
    cpu: Arc<CpuUsageMonitor>,
    models: Option<Arc<Mutex<ModelClient>>>,
    stop: Arc<AtomicBool>,
    windows: Vec<MonitorWindow>,
}

impl MonitorEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        args: MonitorArgs,
        hardware: Box<dyn MonitorHardware>,
        ring: RingBuffers,
        live: Arc<SlotLiveLists>,
        service: Arc<Service>,
        cpu: Arc<CpuUsageMonitor>,
        models: Option<Arc<Mutex<ModelClient>>>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            args,
            hardware,
            ring,
            live,
            service,
            cpu,
            models,
            stop,
            windows: Vec::new(),
        }
    }

    /// Windows recorded so far (excluding discarded ones).
    pub fn windows(&self) -> &[MonitorWindow] {
        &self.windows
    }

    /// Read-only ring access for consumers and tests.
    pub fn ring(&self) -> &RingBuffers {
        &self.ring
    }

    /// Run until the stop flag is observed at the top of an iteration; an
    /// in-flight acquisition always completes first.
    pub fn run(&mut self) -> Result<()> {
        info!(
            "[MONITOR] period {} ms, {} measurements per training, {} ring segments",
            self.args.period_ms,
            self.args.measurements_per_training,
            self.ring.segments()
        );

        let period = millis_to_nanos(self.args.period_ms as i64);
        let mut next_tick = monotonic_nanos() + millis_to_nanos(self.args.startup_delay_ms as i64);
        let mut window_index: u32 = 0;

        while !self.stop.load(Ordering::Acquire) {
            sleep_until(next_tick);

            let cpu = self.cpu.current();

            let measured_start = monotonic_nanos();
            self.hardware
                .start_acquisition()
                .context("[MONITOR] starting acquisition")?;
            self.hardware
                .wait_completion()
                .context("[MONITOR] waiting for acquisition")?;
            let measured_finish = monotonic_nanos();

            let window = MonitorWindow {
                initial_time: self.args.initial_time,
                measured_start,
                measured_finish,
            };

            let acq = self.hardware.read().context("[MONITOR] reading samples")?;

            // Error-flooded windows are recoverable: drop the data, fix the
            // reference voltage and keep the cadence.
            if acq.power_errors > 0 && acq.power_errors as usize >= acq.power.len() {
                warn!(
                    "[MONITOR] {} power errors over {} samples, window discarded",
                    acq.power_errors,
                    acq.power.len()
                );
                self.hardware
                    .reconfigure_vref()
                    .context("[MONITOR] reconfiguring vref")?;
                next_tick += period;
                continue;
            }

            {
                let mut writers = self.ring.writers();

                for sample in &acq.power {
                    writers.power.write_u32::<LittleEndian>(*sample)?;
                }
                writers.power.write_u32::<LittleEndian>(acq.elapsed_cycles)?;
                writers.power.finish();

                for sample in &acq.traces {
                    writers.traces.write_u64::<LittleEndian>(*sample)?;
                }
                writers.traces.finish();

                online::write_online(&mut writers.online, cpu, &window, &self.live)
                    .context("[MONITOR] framing online record")?;
                writers.online.finish();
            }

            self.windows.push(window);
            self.ring.advance();
            window_index += 1;

            if window_index % self.args.measurements_per_training == 0 {
                self.training_phase()?;
                // The phase (and any commanded idle) consumed an unknown
                // stretch; restart the cadence from here.
                next_tick = monotonic_nanos();
            }

            next_tick += period;
        }

        info!("[MONITOR] stopping after {} windows", self.windows.len());
        Ok(())
    }

    /// One TRAIN phase: dispatch pauses only for the blocking model call;
    /// a commanded idle then quiesces the hardware while execution
    /// continues.
    fn training_phase(&mut self) -> Result<()> {
        self.service.set_mode(OperatingMode::Train);
        info!(
            "[MONITOR] training phase: {} windows handed to the model service",
            self.args.measurements_per_training
        );

        let obs_to_wait = match &self.models {
            Some(models) => models
                .lock()
                .unwrap()
                .operation(self.args.measurements_per_training)
                .context("[MONITOR] model operation")?,
            None => 0,
        };

        self.service.set_mode(OperatingMode::Execution);

        if obs_to_wait > 0 {
            let windows_to_wait = obs_to_wait as f32 / self.args.obs_per_window;
            let wait_ms = (windows_to_wait * self.args.period_ms as f32) as i64;
            info!(
                "[MONITOR] commanded idle: {obs_to_wait} observations, {windows_to_wait:.2} windows, {wait_ms} ms"
            );
            sleep_until(monotonic_nanos() + millis_to_nanos(wait_ms));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::hw::{Acquisition, SimulatedMonitor};
    use std::sync::atomic::AtomicU32;
    use std::thread;
    use std::time::Duration;

    fn engine_with(
        hardware: Box<dyn MonitorHardware>,
        dir: &std::path::Path,
        stop: Arc<AtomicBool>,
    ) -> MonitorEngine {
        let ring = RingBuffers::create(dir, 2, 64, 64, 256).unwrap();
        MonitorEngine::new(
            MonitorArgs {
                initial_time: 0,
                period_ms: 5,
                measurements_per_training: 2,
                startup_delay_ms: 0,
                obs_per_window: 1.72,
            },
            hardware,
            ring,
            Arc::new(SlotLiveLists::new(4)),
            Arc::new(Service::new(4, 4)),
            Arc::new(CpuUsageMonitor::new()),
            None,
            stop,
        )
    }

    #[test]
    fn test_windows_recorded_without_model_service() {
        let dir = tempfile::tempdir().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let mut engine = engine_with(Box::new(SimulatedMonitor::new(1, 4, 2)), dir.path(), stop.clone());

        let handle = thread::spawn(move || {
            engine.run().unwrap();
            engine
        });
        thread::sleep(Duration::from_millis(60));
        stop.store(true, Ordering::Release);
        let engine = handle.join().unwrap();

        assert!(engine.windows().len() >= 2);
        assert!(ring::read_footer(engine.ring().online_segment(0)) > 0);
        assert!(ring::read_footer(engine.ring().online_segment(1)) > 0);
        for pair in engine.windows().windows(2) {
            assert!(pair[1].measured_start > pair[0].measured_finish);
        }
    }

    /// Hardware whose every window is flooded with power errors.
    struct ErrorFloodedMonitor {
        reconfigures: Arc<AtomicU32>,
    }

    impl MonitorHardware for ErrorFloodedMonitor {
        fn start_acquisition(&mut self) -> Result<()> {
            Ok(())
        }

        fn wait_completion(&mut self) -> Result<()> {
            Ok(())
        }

        fn read(&mut self) -> Result<Acquisition> {
            Ok(Acquisition {
                power: vec![1, 2],
                traces: vec![3],
                elapsed_cycles: 1,
                power_errors: 2,
            })
        }

        fn reconfigure_vref(&mut self) -> Result<()> {
            self.reconfigures.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_error_flooded_window_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let reconfigures = Arc::new(AtomicU32::new(0));
        let mut engine = engine_with(
            Box::new(ErrorFloodedMonitor {
                reconfigures: reconfigures.clone(),
            }),
            dir.path(),
            stop.clone(),
        );

        let handle = thread::spawn(move || {
            engine.run().unwrap();
            engine
        });
        thread::sleep(Duration::from_millis(40));
        stop.store(true, Ordering::Release);
        let engine = handle.join().unwrap();

        // Every window was dropped: nothing logged, nothing sealed, and
        // the reference voltage was reconfigured each time.
        assert!(engine.windows().is_empty());
        assert_eq!(ring::read_footer(engine.ring().online_segment(0)), 0);
        assert!(reconfigures.load(Ordering::SeqCst) > 0);
    }
}
