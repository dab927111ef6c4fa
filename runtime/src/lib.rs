//! tessera runtime
//!
//! Core workload manager for a slot-based reconfigurable compute
//! platform: admits a paced stream of kernels per workload, dispatches
//! them onto the hardware slots through a bounded worker pool, and runs a
//! monitoring engine whose windows feed an external online-model service.
//!
//! This library wires the engines together; [`run`] is the whole
//! lifecycle of a multi-workload session.

pub mod config;
pub mod hal;
pub mod models;
pub mod monitor;
pub mod output;
pub mod pool;
pub mod sched;
pub mod slots;
pub mod store;
pub mod workload;

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{error, info};

use tessera_shared::utils::time::{millis_to_nanos, monotonic_nanos};

pub use config::Config;

use hal::Accelerator;
use models::ModelClient;
use monitor::cpu::CpuUsageMonitor;
use monitor::hw::MonitorHardware;
use monitor::ring::RingBuffers;
use monitor::{MonitorArgs, MonitorEngine};
use output::OutputLog;
use pool::WorkerPool;
use sched::{Scheduler, Service};
use slots::{SlotLiveLists, SlotTable};
use store::KernelStore;
use workload::Producer;

/// Headroom between process start and the first commanded arrival, so
/// admission pacing is never already late.
const PRODUCER_LEAD_MS: i64 = 1000;

/// Run `num_workloads` workloads to completion and write the final
/// report.
///
/// The calling thread becomes the producer; the dispatch scheduler, the
/// worker pool, the monitoring engine and the CPU-usage sampler run on
/// their own threads. Errors on those threads are fatal to the process
/// after a component-tagged diagnostic.
pub fn run(
    config: Config,
    num_workloads: usize,
    accelerator: Arc<dyn Accelerator>,
    hardware: Box<dyn MonitorHardware>,
) -> Result<()> {
    config.validate().context("invalid configuration")?;
    if num_workloads == 0 {
        anyhow::bail!("num_workloads must be a positive integer");
    }

    let initial_time = monotonic_nanos() + millis_to_nanos(PRODUCER_LEAD_MS);

    let store = Arc::new(KernelStore::new());
    let service = Arc::new(Service::new(config.num_slots, config.num_labels));
    let slot_table = Arc::new(SlotTable::new(config.num_slots));
    let live = Arc::new(SlotLiveLists::new(config.num_slots));
    let output = Arc::new(OutputLog::new());
    let pool = Arc::new(WorkerPool::new(config.workers()).context("creating the worker pool")?);
    let stop = Arc::new(AtomicBool::new(false));
    let cpu = Arc::new(CpuUsageMonitor::new());

    let models = if config.models_enabled {
        let client = ModelClient::connect(
            &config.training_socket,
            &config.prediction_socket,
            config.measurements_per_training,
        )
        .context("connecting to the model service")?;
        Some(Arc::new(Mutex::new(client)))
    } else {
        None
    };

    // Dispatch scheduler thread.
    let scheduler = Scheduler::new(
        service.clone(),
        store.clone(),
        slot_table.clone(),
        live.clone(),
        output.clone(),
        pool.clone(),
        accelerator,
        config.num_kernels,
    );
    let scheduler_handle = thread::Builder::new()
        .name("scheduler".into())
        .spawn(move || {
            if let Err(err) = scheduler.run(num_workloads) {
                error!("[SCHED] {err:#}");
                process::exit(1);
            }
        })
        .context("spawning the scheduler thread")?;

    // Monitoring engine and CPU-usage sampler threads.
    let mut monitor_handle: Option<JoinHandle<()>> = None;
    let mut cpu_handle: Option<JoinHandle<()>> = None;
    if config.monitor_enabled {
        std::fs::create_dir_all(&config.shm_dir)
            .with_context(|| format!("creating {}", config.shm_dir.display()))?;
        let ring = RingBuffers::create(
            &config.shm_dir,
            config.measurements_per_training,
            config.power_segment_bytes,
            config.traces_segment_bytes,
            config.online_segment_bytes,
        )
        .context("creating the ring buffers")?;

        let mut engine = MonitorEngine::new(
            MonitorArgs {
                initial_time,
                period_ms: config.monitoring_period_ms,
                measurements_per_training: config.measurements_per_training,
                startup_delay_ms: config.monitor_startup_delay_ms,
                obs_per_window: config.obs_per_window,
            },
            hardware,
            ring,
            live.clone(),
            service.clone(),
            cpu.clone(),
            models.clone(),
            stop.clone(),
        );
        monitor_handle = Some(
            thread::Builder::new()
                .name("monitor".into())
                .spawn(move || {
                    if let Err(err) = engine.run() {
                        error!("[MONITOR] {err:#}");
                        process::exit(1);
                    }
                })
                .context("spawning the monitor thread")?,
        );

        let cpu_cell = cpu.clone();
        let cpu_stop = stop.clone();
        let cpu_period = config.cpu_usage_period_ms;
        cpu_handle = Some(
            thread::Builder::new()
                .name("cpu-usage".into())
                .spawn(move || {
                    if let Err(err) = cpu_cell.run(cpu_period, &cpu_stop) {
                        error!("[MONITOR] cpu usage sampler: {err:#}");
                        process::exit(1);
                    }
                })
                .context("spawning the cpu-usage thread")?,
        );
    }

    // This thread is the producer.
    let mut producer = Producer::new(&config, store.clone(), service.clone(), initial_time);
    for index in 0..num_workloads {
        if index != 0 {
            if let Some(models) = &models {
                models
                    .lock()
                    .unwrap()
                    .notify_new_workload()
                    .context("announcing the next workload")?;
            }
        }
        producer
            .run_workload(index)
            .with_context(|| format!("producing workload {index}"))?;
        service.wait_workload_finished();
        info!("workload #{index} drained");
    }

    if scheduler_handle.join().is_err() {
        anyhow::bail!("[SCHED] scheduler thread panicked");
    }

    // End the model session before stopping the monitor: it may be asleep
    // in a commanded idle, and the service must not be left waiting.
    if let Some(models) = &models {
        models
            .lock()
            .unwrap()
            .end_session()
            .context("ending the model session")?;
    }

    stop.store(true, Ordering::Release);
    if let Some(handle) = monitor_handle {
        if handle.join().is_err() {
            anyhow::bail!("[MONITOR] monitor thread panicked");
        }
    }
    if let Some(handle) = cpu_handle {
        if handle.join().is_err() {
            anyhow::bail!("[MONITOR] cpu usage thread panicked");
        }
    }

    pool.shutdown();
    let completed = pool.completed_per_worker();
    info!(
        "worker pool: {} tasks over {} workers {:?}",
        completed.iter().sum::<u64>(),
        completed.len(),
        completed
    );

    output
        .write_to(&config.output_path)
        .context("writing the kernel report")?;
    info!("run complete: {} records reported", output.len());
    Ok(())
}
