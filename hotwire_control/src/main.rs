//! # Hot-wire Controller
//!
//! Runs the Motion Task and the Supervisory Task on two threads against a
//! simulated two-axis machine. Projects and the configuration file are read
//! from a host directory standing in for the storage card.
//!
//! Operator input comes from stdin, or from a `--script` file.

use clap::Parser;
use hotwire_common::config::{ConfigError, LogLevel};
use hotwire_common::consts::DEFAULT_CONFIG_FILE;
use hotwire_common::machine::config::{AxisConfig, HomingDirection, MachineConfig};
use hotwire_common::machine::state::Axis;
use hotwire_control::channel::{CommandQueue, StatusQueue, command_channel, status_channel};
use hotwire_control::config::{ConfigStore, load_config};
use hotwire_control::cycle::{MotionTask, rt_setup};
use hotwire_control::hal::{Axes, SimulatedIo, SimulatedStepper};
use hotwire_control::storage::{FsStorage, StorageGate};
use hotwire_control::supervisor::{Supervisor, spawn_line_reader};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Hot-wire cutter controller (simulated machine)
#[derive(Parser, Debug)]
#[command(name = "hotwire_control")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Two-task hot-wire cutter controller running a simulated machine")]
struct Args {
    /// Storage root: holds the configuration file and the projects directory.
    #[arg(long, value_name = "DIR", default_value = ".")]
    root: PathBuf,

    /// Configuration file, relative to the storage root.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Read console commands from a file instead of stdin.
    #[arg(long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// CPU core to pin the motion thread to (rt feature).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority of the motion thread (rt feature).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs and status in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    let path = args.root.join(&args.config);
    let loaded = match load_config(&path) {
        Err(ConfigError::FileNotFound) => Ok(None),
        other => other.map(Some),
    };
    let log_level = match &loaded {
        Ok(Some(config)) => config.log_level,
        _ => LogLevel::Info,
    };
    setup_tracing(&args, log_level);

    info!("Hot-wire controller v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(Some(config)) => config,
        Ok(None) => {
            warn!(path = %path.display(), "configuration file not found, using defaults");
            MachineConfig::default()
        }
        Err(e) => {
            error!("FATAL: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(&args, config) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("Hot-wire controller shutdown complete");
}

fn run(args: &Args, config: MachineConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        root = %args.root.display(),
        projects_dir = %config.projects_dir,
        x_steps_per_mm = config.x.steps_per_mm,
        y_steps_per_mm = config.y.steps_per_mm,
        "config OK"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(true, Ordering::SeqCst);
    })?;

    let input = match &args.script {
        Some(path) => spawn_line_reader(BufReader::new(File::open(path)?)),
        None => spawn_line_reader(BufReader::new(io::stdin())),
    };

    let (axes, io) = simulated_machine(&config);
    let store = Arc::new(ConfigStore::new(config));
    let gate = Arc::new(StorageGate::new(FsStorage::new(&args.root)));

    let mut motion = MotionTask::new(Arc::clone(&store), Arc::clone(&gate), axes, io);
    let mut supervisor = Supervisor::new(store, gate, args.config.clone(), args.json);

    let mut command_queue = CommandQueue::new();
    let mut status_queue = StatusQueue::new();
    let (mut cmd_tx, mut cmd_rx) = command_channel(&mut command_queue);
    let (mut status_tx, mut status_rx) = status_channel(&mut status_queue);

    let (cpu_core, rt_priority) = (args.cpu_core, args.rt_priority);
    let shutdown = &*shutdown;

    thread::scope(|s| -> Result<(), Box<dyn std::error::Error>> {
        let motion_thread = thread::Builder::new()
            .name("motion".into())
            .spawn_scoped(s, move || {
                let setup = rt_setup(cpu_core, rt_priority);
                match &setup {
                    Ok(()) => {
                        info!(cpu_core, rt_priority, "RT setup complete");
                        motion.run(&mut cmd_rx, &mut status_tx, shutdown);
                    }
                    Err(_) => shutdown.store(true, Ordering::SeqCst),
                }
                setup
            })?;

        supervisor.run(input, &mut cmd_tx, &mut status_rx, shutdown);

        motion_thread
            .join()
            .map_err(|_| "motion thread panicked")??;
        Ok(())
    })
}

/// Paced steppers parked mid-travel, with limit switches at the homing end.
fn simulated_machine(config: &MachineConfig) -> (Axes<SimulatedStepper>, SimulatedIo) {
    let direction = config.homing.direction;
    let limit_at = |axis: &AxisConfig| match direction {
        HomingDirection::Negative => 0,
        HomingDirection::Positive => axis.to_steps(axis.max_travel),
    };

    let x = SimulatedStepper::paced().placed_at(config.x.to_steps(config.x.max_travel / 2.0));
    let y = SimulatedStepper::paced().placed_at(config.y.to_steps(config.y.max_travel / 2.0));
    let io = SimulatedIo::new(config.safety.limit_switch_type)
        .with_limit(Axis::X, x.readout(), limit_at(&config.x), direction)
        .with_limit(Axis::Y, y.readout(), limit_at(&config.y), direction);

    (Axes::new(x, y), io)
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        configured.as_directive().parse().unwrap_or(Level::INFO)
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
