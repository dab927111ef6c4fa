//! Monitoring window types

/// One periodic acquisition, bounded by monotonic timestamps in
/// nanoseconds captured immediately before and after the hardware run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorWindow {
    /// Application epoch shared by every window of the run.
    pub initial_time: i64,

    /// Window start, captured before the acquisition was started.
    pub measured_start: i64,

    /// Window end, captured after the hardware signalled completion.
    pub measured_finish: i64,
}

/// CPU usage percentages over the last sampling interval.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuUsage {
    pub user: f32,
    pub kernel: f32,
    pub idle: f32,
}
