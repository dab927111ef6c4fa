//! Monitor hardware seam
//!
//! The physical monitor (sample BRAMs, trigger registers, the "done"
//! interrupt) is outside the core; the engine drives it through this
//! trait. The shipped implementation synthesizes deterministic sample
//! ramps with the acquisition latency of the reference hardware.

use std::thread;
use std::time::Duration;

use anyhow::Result;

/// One completed acquisition read back from the monitor.
#[derive(Debug, Clone)]
pub struct Acquisition {
    /// Raw power samples.
    pub power: Vec<u32>,

    /// Raw performance-trace samples.
    pub traces: Vec<u64>,

    /// Hardware-reported acquisition length, in monitor clock cycles.
    pub elapsed_cycles: u32,

    /// Power samples the ADC flagged as erroneous.
    pub power_errors: u32,
}

/// Driver surface of the monitoring hardware.
pub trait MonitorHardware: Send {
    /// Arm and start one acquisition.
    fn start_acquisition(&mut self) -> Result<()>;

    /// Block until the hardware signals completion.
    fn wait_completion(&mut self) -> Result<()>;

    /// Read the acquired samples and counters.
    fn read(&mut self) -> Result<Acquisition>;

    /// Reconfigure the ADC reference voltage after an error-flooded
    /// window.
    fn reconfigure_vref(&mut self) -> Result<()>;
}

/// Deterministic stand-in for the physical monitor.
pub struct SimulatedMonitor {
    acquisition_ms: u64,
    power_samples: usize,
    trace_samples: usize,
    windows_read: u32,
}

impl SimulatedMonitor {
    pub fn new(acquisition_ms: u64, power_samples: usize, trace_samples: usize) -> Self {
        Self {
            acquisition_ms,
            power_samples,
            trace_samples,
            windows_read: 0,
        }
    }
}

impl MonitorHardware for SimulatedMonitor {
    fn start_acquisition(&mut self) -> Result<()> {
        Ok(())
    }

    fn wait_completion(&mut self) -> Result<()> {
        thread::sleep(Duration::from_millis(self.acquisition_ms));
        Ok(())
    }

    fn read(&mut self) -> Result<Acquisition> {
        let base = self.windows_read;
        self.windows_read += 1;
        Ok(Acquisition {
            power: (0..self.power_samples).map(|i| base + i as u32).collect(),
            traces: (0..self.trace_samples)
                .map(|i| base as u64 * 1000 + i as u64)
                .collect(),
            elapsed_cycles: self.acquisition_ms as u32 * 100_000,
            power_errors: 0,
        })
    }

    fn reconfigure_vref(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_acquisition_shape() {
        let mut hw = SimulatedMonitor::new(0, 4, 2);
        hw.start_acquisition().unwrap();
        hw.wait_completion().unwrap();
        let acq = hw.read().unwrap();
        assert_eq!(acq.power.len(), 4);
        assert_eq!(acq.traces.len(), 2);
        assert_eq!(acq.power_errors, 0);

        // Successive windows produce distinct ramps.
        let next = hw.read().unwrap();
        assert_ne!(acq.power, next.power);
    }
}
