//! Shared test rig: a Motion Task on simulated axes with virtual time.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use hotwire_common::prelude::*;
use hotwire_control::channel::{
    CommandQueue, CommandReceiver, CommandSender, StatusQueue, StatusReceiver, StatusSender,
    command_channel, status_channel,
};
use hotwire_control::config::ConfigStore;
use hotwire_control::cycle::MotionTask;
use hotwire_control::hal::{Axes, SimulatedIo, SimulatedStepper};
use hotwire_control::storage::{FsStorage, StorageGate};
use tempfile::TempDir;

/// Virtual time per tick.
pub const TICK: Duration = Duration::from_millis(10);

pub type Task = MotionTask<SimulatedStepper, SimulatedIo, FsStorage>;

/// Small machine: 10 steps/mm, 100 mm travel, switches disabled.
pub fn base_config() -> MachineConfig {
    let mut config = MachineConfig::default();
    config.projects_dir = "projects".into();
    config.x.steps_per_mm = 10.0;
    config.y.steps_per_mm = 10.0;
    config.x.max_travel = 100.0;
    config.y.max_travel = 100.0;
    config.homing.backoff = 2.0;
    config.safety.deactivate_limit_switches = true;
    config
}

pub struct Rig {
    pub dir: TempDir,
    pub store: Arc<ConfigStore>,
    pub gate: Arc<StorageGate<FsStorage>>,
    pub task: Task,
    pub estop: Arc<AtomicBool>,
    pub cmd_tx: CommandSender<'static>,
    cmd_rx: CommandReceiver<'static>,
    status_tx: StatusSender<'static>,
    status_rx: StatusReceiver<'static>,
    pub now: Instant,
}

impl Rig {
    /// Axes at the origin, no limit switches.
    pub fn new(config: MachineConfig) -> Self {
        let axes = Axes::new(SimulatedStepper::free_running(), SimulatedStepper::free_running());
        let io = SimulatedIo::new(config.safety.limit_switch_type);
        Self::with_machine(config, axes, io)
    }

    /// Axes parked at `x`/`y` steps, switches at 0 on the negative end.
    pub fn with_switches(config: MachineConfig, x: i64, y: i64) -> Self {
        let axes = Axes::new(
            SimulatedStepper::free_running().placed_at(x),
            SimulatedStepper::free_running().placed_at(y),
        );
        let io = SimulatedIo::new(LimitSwitchType::NormallyOpen)
            .with_limit(Axis::X, axes.x.readout(), 0, HomingDirection::Negative)
            .with_limit(Axis::Y, axes.y.readout(), 0, HomingDirection::Negative);
        Self::with_machine(config, axes, io)
    }

    fn with_machine(config: MachineConfig, axes: Axes<SimulatedStepper>, io: SimulatedIo) -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(&config.projects_dir)).unwrap();

        let estop = io.estop_handle();
        let store = Arc::new(ConfigStore::new(config));
        let gate = Arc::new(StorageGate::new(FsStorage::new(dir.path())));
        let task = MotionTask::new(Arc::clone(&store), Arc::clone(&gate), axes, io);

        let command_queue: &'static mut CommandQueue = Box::leak(Box::new(CommandQueue::new()));
        let status_queue: &'static mut StatusQueue = Box::leak(Box::new(StatusQueue::new()));
        let (cmd_tx, cmd_rx) = command_channel(command_queue);
        let (status_tx, status_rx) = status_channel(status_queue);

        Self {
            dir,
            store,
            gate,
            task,
            estop,
            cmd_tx,
            cmd_rx,
            status_tx,
            status_rx,
            now: Instant::now(),
        }
    }

    /// Write a project and select it.
    pub fn project(&mut self, name: &str, gcode: &str) {
        let config = self.store.snapshot();
        fs::write(self.dir.path().join(&config.projects_dir).join(name), gcode).unwrap();
        self.gate.select_project(name).unwrap();
    }

    pub fn mode(&self) -> Mode {
        self.task.mode()
    }

    pub fn stage(&self) -> JobStage {
        self.task.job_stage()
    }

    /// Queue `command` stamped with the current virtual time.
    pub fn send(&mut self, command: Command) -> bool {
        self.cmd_tx.send_envelope(CommandEnvelope::new(command, self.now))
    }

    pub fn send_with_priority(&mut self, command: Command, priority: CommandPriority) -> bool {
        self.cmd_tx
            .send_envelope(CommandEnvelope::new(command, self.now).with_priority(priority))
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// One Motion Task tick, then advance virtual time.
    pub fn tick(&mut self) {
        self.task.tick(self.now, &mut self.cmd_rx, &mut self.status_tx);
        self.now += TICK;
    }

    pub fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }

    /// Let the poll interval elapse, queue `command` and tick once so it
    /// executes on that tick.
    pub fn command(&mut self, command: Command) {
        let poll = Duration::from_millis(self.task.config().timing.command_poll_ms);
        self.advance(poll);
        assert!(self.send(command), "command channel full");
        self.tick();
    }

    /// Tick until `done` holds. Returns the number of ticks taken.
    pub fn run_until(&mut self, limit: usize, mut done: impl FnMut(&Rig) -> bool) -> usize {
        for n in 0..limit {
            if done(self) {
                return n;
            }
            self.tick();
        }
        panic!("condition not reached within {limit} ticks");
    }

    /// Drain the Status Channel.
    pub fn statuses(&mut self) -> Vec<StatusSnapshot> {
        std::iter::from_fn(|| self.status_rx.try_recv()).collect()
    }
}
