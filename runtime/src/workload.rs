//! Workload intake (the producer side)
//!
//! Each workload is described by three little-endian binary files of equal
//! length: per-kernel inter-arrival delays (f32 ms), labels (i32) and
//! execution counts (i32). The producer turns them into kernel records and
//! admits each one at its commanded absolute arrival time.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use tessera_shared::types::kernel::{KernelLabel, KernelRecord};
use tessera_shared::utils::time::{millis_to_nanos, sleep_until};

use crate::config::Config;
use crate::sched::Service;
use crate::store::KernelStore;

/// Parsed contents of one workload's input files.
pub struct WorkloadSpec {
    pub inter_arrival_ms: Vec<f32>,
    pub labels: Vec<i32>,
    pub executions: Vec<i32>,
}

impl WorkloadSpec {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Load workload `index` from `dir`, checking the three files agree in
/// length.
pub fn load_workload(dir: &Path, index: usize) -> Result<WorkloadSpec> {
    let inter_arrival_ms = read_f32_file(&dir.join(format!("inter_arrival_{index}.bin")))?;
    let labels = read_i32_file(&dir.join(format!("kernel_id_{index}.bin")))?;
    let executions = read_i32_file(&dir.join(format!("num_executions_{index}.bin")))?;

    if labels.len() != inter_arrival_ms.len() || labels.len() != executions.len() {
        anyhow::bail!(
            "workload {index}: file lengths disagree ({} arrivals, {} labels, {} execution counts)",
            inter_arrival_ms.len(),
            labels.len(),
            executions.len()
        );
    }

    Ok(WorkloadSpec {
        inter_arrival_ms,
        labels,
        executions,
    })
}

fn read_f32_file(path: &Path) -> Result<Vec<f32>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.len() % 4 != 0 {
        anyhow::bail!("{}: length {} is not a multiple of 4", path.display(), bytes.len());
    }
    let mut values = vec![0f32; bytes.len() / 4];
    LittleEndian::read_f32_into(&bytes, &mut values);
    debug!("{}: read {} f32 values", path.display(), values.len());
    Ok(values)
}

fn read_i32_file(path: &Path) -> Result<Vec<i32>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.len() % 4 != 0 {
        anyhow::bail!("{}: length {} is not a multiple of 4", path.display(), bytes.len());
    }
    let mut values = vec![0i32; bytes.len() / 4];
    LittleEndian::read_i32_into(&bytes, &mut values);
    debug!("{}: read {} i32 values", path.display(), values.len());
    Ok(values)
}

/// Builds kernel records from a workload spec and admits them on schedule.
pub struct Producer {
    config: Config,
    store: Arc<KernelStore>,
    service: Arc<Service>,
    rng: ChaCha8Rng,

    /// Absolute monotonic cursor advanced by each inter-arrival delay;
    /// every record's commanded arrival is a point on this schedule.
    schedule_cursor: i64,
}

impl Producer {
    pub fn new(
        config: &Config,
        store: Arc<KernelStore>,
        service: Arc<Service>,
        initial_time: i64,
    ) -> Self {
        Self {
            config: config.clone(),
            store,
            service,
            rng: ChaCha8Rng::seed_from_u64(config.rng_seed),
            schedule_cursor: initial_time,
        }
    }

    /// Build the records for one workload without admitting them.
    ///
    /// Labels and execution counts are validated here: an out-of-range
    /// label or a non-positive count is an admission invariant error.
    pub fn generate(&mut self, spec: &WorkloadSpec) -> Result<VecDeque<KernelRecord>> {
        if spec.len() != self.config.num_kernels {
            anyhow::bail!(
                "workload holds {} kernels, configuration expects {}",
                spec.len(),
                self.config.num_kernels
            );
        }

        let mut generated = VecDeque::with_capacity(spec.len());
        for i in 0..spec.len() {
            let label = spec.labels[i];
            if label < 0 || label as u32 >= self.config.num_labels {
                anyhow::bail!(
                    "[SCHED] kernel #{i}: label {label} outside [0, {})",
                    self.config.num_labels
                );
            }
            let executions = spec.executions[i];
            if executions <= 0 {
                anyhow::bail!("[SCHED] kernel #{i}: non-positive execution count {executions}");
            }

            let delay_ms = spec.inter_arrival_ms[i] as i64;
            self.schedule_cursor += millis_to_nanos(delay_ms);

            // Width selection stands in for the model-driven choice of the
            // reference system.
            let cu = self
                .config
                .cu_choices
                .choose(&mut self.rng)
                .copied()
                .context("no compute-unit widths configured")?;

            generated.push_back(KernelRecord::new(
                i as u32,
                KernelLabel(label as u32),
                executions as u32,
                cu,
                delay_ms,
                self.schedule_cursor,
            ));
        }
        Ok(generated)
    }

    /// Load, generate and admit one whole workload, pacing each record to
    /// its commanded arrival.
    pub fn run_workload(&mut self, index: usize) -> Result<()> {
        let spec = load_workload(&self.config.workload_dir, index)
            .with_context(|| format!("loading workload {index}"))?;
        let generated = self.generate(&spec)?;
        info!(
            "producer: workload #{index} generated, {} kernels",
            generated.len()
        );

        for record in generated {
            sleep_until(record.commanded_arrival);
            self.store.append(record);
            self.service.note_admitted();
        }
        Ok(())
    }
}
