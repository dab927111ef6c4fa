//! CPU-usage sampler
//!
//! A dedicated thread parses `/proc/stat` on a fixed absolute-deadline
//! cadence and publishes the user/kernel/idle percentages of the last
//! interval. The monitoring engine stamps them into every online record
//! and the prediction feature vector.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};

use tessera_shared::types::monitor::CpuUsage;
use tessera_shared::utils::time::{millis_to_nanos, monotonic_nanos, sleep_until};

const PROC_STAT: &str = "/proc/stat";

/// Raw jiffy counters from the aggregate cpu line. The `nice` column is
/// skipped; `system` time is reported as "kernel" usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStats {
    pub user: u64,
    pub system: u64,
    pub idle: u64,
}

/// Parse the aggregate `cpu` line of `/proc/stat`.
pub fn parse_proc_stat(contents: &str) -> Result<CpuStats> {
    let line = contents
        .lines()
        .find(|l| l.starts_with("cpu "))
        .context("no aggregate cpu line in /proc/stat")?;

    let mut fields = line.split_whitespace().skip(1);
    let mut next = |name: &str| -> Result<u64> {
        fields
            .next()
            .with_context(|| format!("missing {name} column"))?
            .parse::<u64>()
            .with_context(|| format!("malformed {name} column"))
    };

    let user = next("user")?;
    let _nice = next("nice")?;
    let system = next("system")?;
    let idle = next("idle")?;
    Ok(CpuStats { user, system, idle })
}

/// Percentage usage over the interval between two snapshots.
pub fn usage_between(prev: CpuStats, curr: CpuStats) -> CpuUsage {
    let user = curr.user.wrapping_sub(prev.user);
    let system = curr.system.wrapping_sub(prev.system);
    let idle = curr.idle.wrapping_sub(prev.idle);
    let total = user + system + idle;
    if total == 0 {
        return CpuUsage::default();
    }
    CpuUsage {
        user: user as f32 * 100.0 / total as f32,
        kernel: system as f32 * 100.0 / total as f32,
        idle: idle as f32 * 100.0 / total as f32,
    }
}

/// Shared cell holding the latest computed usage triple.
pub struct CpuUsageMonitor {
    usage: Mutex<CpuUsage>,
}

impl CpuUsageMonitor {
    pub fn new() -> Self {
        Self {
            usage: Mutex::new(CpuUsage::default()),
        }
    }

    /// Latest usage triple (zeros until the first interval completes).
    pub fn current(&self) -> CpuUsage {
        *self.usage.lock().unwrap()
    }

    /// Sampling loop. Runs until `stop` is set; deadlines are absolute so
    /// the cadence does not drift.
    pub fn run(&self, period_ms: u64, stop: &AtomicBool) -> Result<()> {
        let mut prev = CpuStats::default();
        let mut deadline = monotonic_nanos();

        while !stop.load(Ordering::Acquire) {
            sleep_until(deadline);

            let contents = fs::read_to_string(PROC_STAT).context("reading /proc/stat")?;
            let curr = parse_proc_stat(&contents)?;
            *self.usage.lock().unwrap() = usage_between(prev, curr);
            prev = curr;

            deadline += millis_to_nanos(period_ms as i64);
        }
        Ok(())
    }
}

impl Default for CpuUsageMonitor {
    fn default() -> Self {
        Self::new()
    }
}
