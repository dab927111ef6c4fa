//! tessera workload-manager binary
//!
//! Main entry point: parses the CLI, prints the configuration on `info`,
//! otherwise runs the requested number of workloads against the simulated
//! accelerator and monitor hardware.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tessera_runtime::hal::SimulatedAccelerator;
use tessera_runtime::monitor::hw::SimulatedMonitor;
use tessera_runtime::Config;

/// Simulated monitor sample counts per window (reference hardware maxima).
const SIM_POWER_SAMPLES: usize = 2048;
const SIM_TRACE_SAMPLES: usize = 512;
const SIM_ACQUISITION_MS: u64 = 15;

#[derive(Parser, Debug)]
#[command(name = "tessera-runtime")]
#[command(about = "Workload manager for a slot-based reconfigurable compute platform", long_about = None)]
#[command(version)]
struct Args {
    /// Number of workloads to execute, or "info" to print the
    /// configuration and exit
    workloads: String,

    /// Directory holding the per-workload binary input files
    #[arg(long)]
    workload_dir: Option<PathBuf>,

    /// Final report path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Directory for the shared-memory ring files
    #[arg(long)]
    shm_dir: Option<PathBuf>,

    /// Model-service training stream endpoint
    #[arg(long)]
    training_socket: Option<PathBuf>,

    /// Model-service prediction stream endpoint
    #[arg(long)]
    prediction_socket: Option<PathBuf>,

    /// Run without the monitoring engine
    #[arg(long)]
    no_monitor: bool,

    /// Run without the model-service connection
    #[arg(long)]
    no_models: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let mut config = Config::default();
    if let Some(dir) = args.workload_dir {
        config.workload_dir = dir;
    }
    if let Some(path) = args.output {
        config.output_path = path;
    }
    if let Some(dir) = args.shm_dir {
        config.shm_dir = dir;
    }
    if let Some(path) = args.training_socket {
        config.training_socket = path;
    }
    if let Some(path) = args.prediction_socket {
        config.prediction_socket = path;
    }
    if args.no_monitor {
        config.monitor_enabled = false;
        config.models_enabled = false;
    }
    if args.no_models {
        config.models_enabled = false;
    }

    if args.workloads == "info" {
        print_config(&config);
        return Ok(());
    }

    let num_workloads: usize = args
        .workloads
        .parse()
        .context("num_workloads must be a positive integer or \"info\"")?;

    info!("Starting tessera runtime: {num_workloads} workload(s)");
    let accelerator = Arc::new(SimulatedAccelerator::new(config.rng_seed));
    let hardware = Box::new(SimulatedMonitor::new(
        SIM_ACQUISITION_MS,
        SIM_POWER_SAMPLES,
        SIM_TRACE_SAMPLES,
    ));
    tessera_runtime::run(config, num_workloads, accelerator, hardware)
}

/// Configuration table printed by the `info` argument.
fn print_config(config: &Config) {
    let rows: Vec<(&str, String)> = vec![
        ("Number of Slots", config.num_slots.to_string()),
        ("Types of Kernels", config.num_labels.to_string()),
        ("Kernels per Workload", config.num_kernels.to_string()),
        ("CU Widths", format!("{:?}", config.cu_choices)),
        ("Monitoring Period (ms)", config.monitoring_period_ms.to_string()),
        (
            "Measurements per Training",
            format!(
                "{} ({:.1}s)",
                config.measurements_per_training,
                config.measurements_per_training as f64 * config.monitoring_period_ms as f64
                    / 1000.0
            ),
        ),
        ("CPU Usage Period (ms)", config.cpu_usage_period_ms.to_string()),
        ("Monitoring Enabled", config.monitor_enabled.to_string()),
        ("Online Models Enabled", config.models_enabled.to_string()),
        ("Workload Directory", config.workload_dir.display().to_string()),
        ("Report Path", config.output_path.display().to_string()),
        ("Ring Directory", config.shm_dir.display().to_string()),
    ];

    let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    println!("{}", "-".repeat(width + 14));
    for (name, value) in rows {
        println!(" {name:<width$} : {value}");
    }
    println!("{}", "-".repeat(width + 14));
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    Ok(())
}
