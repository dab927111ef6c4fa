//! Configuration for the workload manager

use std::path::PathBuf;

use anyhow::Result;

/// Runtime configuration.
///
/// Defaults mirror the reference deployment: 8 execution slots, 11 kernel
/// kinds, 15000 kernels per workload, a 500 ms monitoring window and 200
/// windows per training phase.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of hardware execution slots.
    pub num_slots: u32,

    /// Size of the closed set of kernel kinds.
    pub num_labels: u32,

    /// Kernels admitted per workload (the length of each input file).
    pub num_kernels: usize,

    /// Compute-unit widths the producer may assign to a kernel.
    pub cu_choices: Vec<u32>,

    /// Monitoring window period in ms.
    pub monitoring_period_ms: u64,

    /// Monitoring windows per training phase (the ring depth M).
    pub measurements_per_training: u32,

    /// CPU-usage sampling period in ms.
    pub cpu_usage_period_ms: u64,

    /// Delay before the first monitoring window, in ms.
    pub monitor_startup_delay_ms: u64,

    /// Empirical observations-per-window factor used to convert a
    /// commanded idle (in observations) into a sleep duration.
    pub obs_per_window: f32,

    /// Per-window ring segment sizes, in bytes (empirical maxima).
    pub power_segment_bytes: usize,
    pub traces_segment_bytes: usize,
    pub online_segment_bytes: usize,

    /// Directory holding the per-workload binary input files.
    pub workload_dir: PathBuf,

    /// Final report path.
    pub output_path: PathBuf,

    /// Directory for the shared-memory ring files.
    pub shm_dir: PathBuf,

    /// Model-service stream endpoints.
    pub training_socket: PathBuf,
    pub prediction_socket: PathBuf,

    /// Run the monitoring engine and the CPU-usage sampler.
    pub monitor_enabled: bool,

    /// Talk to the model service during training phases.
    pub models_enabled: bool,

    /// Seed for the producer's CU selection and the simulated accelerator.
    pub rng_seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_slots: 8,
            num_labels: 11,
            num_kernels: 15000,
            cu_choices: vec![1, 2, 4, 8],
            monitoring_period_ms: 500,
            measurements_per_training: 200,
            cpu_usage_period_ms: 150,
            monitor_startup_delay_ms: 2000,
            obs_per_window: 1.72,
            power_segment_bytes: 525 * 1024,
            traces_segment_bytes: 20 * 1024,
            online_segment_bytes: 2 * 1024,
            workload_dir: PathBuf::from("synthetic_workload"),
            output_path: PathBuf::from("outputs/kernels_info.bin"),
            shm_dir: PathBuf::from("/dev/shm"),
            training_socket: PathBuf::from("/tmp/tessera_training_socket"),
            prediction_socket: PathBuf::from("/tmp/tessera_prediction_socket"),
            monitor_enabled: true,
            models_enabled: true,
            rng_seed: 42,
        }
    }
}

impl Config {
    /// Worker pool size: one worker per slot plus one.
    pub fn workers(&self) -> usize {
        self.num_slots as usize + 1
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.num_slots == 0 || self.num_slots > 32 {
            anyhow::bail!("num_slots must be in 1..=32 (slot masks are 32-bit)");
        }
        if self.num_labels == 0 {
            anyhow::bail!("num_labels must be greater than 0");
        }
        if self.num_kernels == 0 {
            anyhow::bail!("num_kernels must be greater than 0");
        }
        if self.cu_choices.is_empty() {
            anyhow::bail!("cu_choices must not be empty");
        }
        for &cu in &self.cu_choices {
            if cu == 0 || cu > self.num_slots {
                anyhow::bail!("cu width {} outside 1..={}", cu, self.num_slots);
            }
        }
        if self.monitoring_period_ms == 0 {
            anyhow::bail!("monitoring period must be greater than 0");
        }
        if self.measurements_per_training == 0 {
            anyhow::bail!("measurements_per_training must be at least 1");
        }
        if self.cpu_usage_period_ms == 0 {
            anyhow::bail!("CPU usage period must be greater than 0");
        }
        if !(self.obs_per_window > 0.0) {
            anyhow::bail!("obs_per_window must be positive");
        }
        for (name, size) in [
            ("power", self.power_segment_bytes),
            ("traces", self.traces_segment_bytes),
            ("online", self.online_segment_bytes),
        ] {
            if size < 8 || size % 4 != 0 {
                anyhow::bail!("{} segment size must be a positive multiple of 4 words", name);
            }
        }
        if self.models_enabled && !self.monitor_enabled {
            anyhow::bail!("the model service requires the monitoring engine");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers(), 9);
    }

    #[test]
    fn test_rejects_zero_slots() {
        let config = Config {
            num_slots: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_cu_wider_than_pool() {
        let config = Config {
            num_slots: 4,
            cu_choices: vec![1, 2, 4, 8],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_models_without_monitor() {
        let config = Config {
            monitor_enabled: false,
            models_enabled: true,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unaligned_segment() {
        let config = Config {
            online_segment_bytes: 1022,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
