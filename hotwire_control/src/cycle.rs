//! Motion Task: the cooperative control loop that owns the axes.
//!
//! ## RT Setup Sequence
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)`: lock all pages.
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity`: pin to the configured CPU core.
//! 4. `sched_setscheduler(SCHED_FIFO, prio)`.
//!
//! Every step is a no-op without the `rt` feature.
//!
//! ## Tick Body
//! 1. Drain the Command Channel into the arbiter, execute at most one command.
//! 2. Sample the emergency-stop input (unless deactivated).
//! 3. Step the active controller (job engine, jog or homing) once.
//! 4. Write changed outputs to the I/O layer.
//! 5. Publish a status snapshot if due.
//! 6. Record tick duration; count an overrun against the active (moving)
//!    or idle budget.
//!
//! Nothing in the body waits: storage is only taken with a zero timeout and
//! both channels are non-blocking.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use hotwire_common::machine::command::{Accessory, Command, JogRequest};
use hotwire_common::machine::config::MachineConfig;
use hotwire_common::machine::state::{FaultFlags, HomingStage, JobStage, Mode, Positioning};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::channel::{CommandReceiver, StatusSender};
use crate::command::arbitration::CommandArbiter;
use crate::command::homing::{HomingController, HomingFailReason, HomingTickResult};
use crate::command::jog::{JogController, JogTick};
use crate::config::ConfigStore;
use crate::hal::{AxisDriver, Axes, MachineIo, OutputLatch};
use crate::job::{JobEngine, JobTick};
use crate::state::machine::{ModeEvent, TransitionResult};
use crate::state::runtime::MachineState;
use crate::status::StatusPublisher;
use crate::storage::{StorageDevice, StorageGate};

// ─── Tick Statistics ────────────────────────────────────────────────

/// O(1) per-tick timing statistics.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Total ticks executed.
    pub cycle_count: u64,
    /// Last tick duration [ns].
    pub last_cycle_ns: i64,
    /// Minimum tick duration [ns].
    pub min_cycle_ns: i64,
    /// Maximum tick duration [ns].
    pub max_cycle_ns: i64,
    /// Running sum for average computation.
    pub sum_cycle_ns: i64,
    /// Ticks that exceeded their budget.
    pub overruns: u64,
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
        }
    }

    /// Record a tick duration. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns = self.sum_cycle_ns.saturating_add(duration_ns);
    }

    /// Average tick time [ns] (0 if no ticks).
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CycleError {
    /// RT system call failed.
    #[error("RT setup error: {0}")]
    RtSetup(String),
}

#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), CycleError> {
    use nix::sys::mman::{MlockAllFlags, mlockall};
    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), CycleError> {
    Ok(())
}

/// Touch stack pages so the loop does not fault them in later.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusive reference into `buf`.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), CycleError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| CycleError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| CycleError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), CycleError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), CycleError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` outlives the call; pid 0 is the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(CycleError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), CycleError> {
    Ok(())
}

/// Apply the RT setup sequence to the calling thread.
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), CycleError> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

// ─── Motion Task ────────────────────────────────────────────────────

/// Everything the Motion Task owns.
///
/// Axis drivers, machine I/O and machine state are reachable only through
/// this value; the Supervisory Task talks to it over the channels and the
/// shared Storage Gate / Configuration Provider.
pub struct MotionTask<A, I, D: StorageDevice> {
    config: MachineConfig,
    store: Arc<ConfigStore>,
    gate: Arc<StorageGate<D>>,
    axes: Axes<A>,
    io: I,
    latch: OutputLatch,
    state: MachineState,
    arbiter: CommandArbiter,
    jog: JogController,
    homing: HomingController,
    job: JobEngine<D>,
    publisher: StatusPublisher,
    stats: CycleStats,
}

impl<A, I, D> MotionTask<A, I, D>
where
    A: AxisDriver,
    I: MachineIo,
    D: StorageDevice,
{
    pub fn new(store: Arc<ConfigStore>, gate: Arc<StorageGate<D>>, axes: Axes<A>, io: I) -> Self {
        let config = store.snapshot();
        Self {
            state: MachineState::new(&config),
            arbiter: CommandArbiter::new(&config.timing),
            publisher: StatusPublisher::new(&config.timing),
            config,
            store,
            gate,
            axes,
            io,
            latch: OutputLatch::new(),
            jog: JogController::new(),
            homing: HomingController::new(),
            job: JobEngine::new(),
            stats: CycleStats::new(),
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────

    #[inline]
    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn axes(&self) -> &Axes<A> {
        &self.axes
    }

    pub fn io(&self) -> &I {
        &self.io
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn job_stage(&self) -> JobStage {
        self.job.stage()
    }

    pub fn homing_stage(&self) -> HomingStage {
        self.homing.stage()
    }

    pub fn job(&self) -> &JobEngine<D> {
        &self.job
    }

    // ─── Loop ───────────────────────────────────────────────────────

    /// Run ticks until `shutdown` is set, then halt and switch outputs off.
    pub fn run(
        &mut self,
        rx: &mut CommandReceiver<'_>,
        tx: &mut StatusSender<'_>,
        shutdown: &AtomicBool,
    ) {
        info!("motion task started");
        while !shutdown.load(Ordering::Relaxed) {
            self.tick(Instant::now(), rx, tx);
            let pause = if self.mode().is_active() {
                Duration::from_micros(self.config.timing.active_tick_us)
            } else {
                Duration::from_millis(self.config.timing.idle_tick_ms)
            };
            thread::sleep(pause);
        }

        self.abort_all(Instant::now());
        self.state.outputs.force_off();
        self.latch.apply(self.state.outputs, &mut self.io);
        info!(
            ticks = self.stats.cycle_count,
            avg_us = self.stats.avg_cycle_ns() / 1000,
            max_us = self.stats.max_cycle_ns / 1000,
            overruns = self.stats.overruns,
            "motion task stopped"
        );
    }

    /// One bounded iteration of the Motion Task.
    pub fn tick(&mut self, now: Instant, rx: &mut CommandReceiver<'_>, tx: &mut StatusSender<'_>) {
        let started = Instant::now();

        self.arbiter.collect(rx, now);
        let overflow = self.arbiter.take_overflow();
        self.state.counters.discarded_commands =
            self.state.counters.discarded_commands.saturating_add(overflow);
        if let Some(envelope) = self.arbiter.next(now) {
            self.dispatch(now, envelope.command);
        }
        self.state.counters.stale_commands = self.arbiter.stale_dropped();

        // Sampled after dispatch so a held input wins over RESET.
        if !self.config.safety.deactivate_estop && self.io.estop_asserted() {
            self.emergency_stop(now, "emergency stop input asserted");
        }

        self.step_controller(now);

        self.latch.apply(self.state.outputs, &mut self.io);

        let snapshot = self.state.snapshot(self.job.stage(), self.homing.stage());
        self.publisher.publish(now, snapshot, tx);

        self.record_tick(started.elapsed());
    }

    fn record_tick(&mut self, elapsed: Duration) {
        self.stats.record(elapsed.as_nanos().min(i64::MAX as u128) as i64);
        let timing = &self.config.timing;
        let budget = if self.mode().is_active() {
            Duration::from_millis(timing.active_budget_ms)
        } else {
            Duration::from_millis(timing.idle_budget_ms)
        };
        if elapsed > budget {
            self.stats.overruns += 1;
            self.state.counters.tick_overruns = self.state.counters.tick_overruns.saturating_add(1);
            warn!(
                elapsed_us = elapsed.as_micros() as u64,
                budget_ms = budget.as_millis() as u64,
                mode = self.mode().name(),
                "tick overran its budget"
            );
        }
    }

    // ─── Commands ───────────────────────────────────────────────────

    fn dispatch(&mut self, now: Instant, command: Command) {
        if !self.state.mode.accepts(&command) {
            self.state.counters.discarded_commands =
                self.state.counters.discarded_commands.saturating_add(1);
            debug!(
                command = command.name(),
                mode = self.mode().name(),
                "command not legal in this mode, discarded"
            );
            return;
        }
        debug!(command = command.name(), mode = self.mode().name(), "executing command");

        match command {
            Command::Start => self.start_job(now),
            Command::Stop => self.stop(),
            Command::Pause => self.job.toggle_pause(now, &mut self.state),
            Command::Home => self.start_homing(now),
            Command::Reset => self.reset(now),
            Command::Zero => {
                self.axes.zero();
                self.state.x_mm = 0.0;
                self.state.y_mm = 0.0;
                info!("position zeroed");
            }
            Command::Jog(request) => self.start_jog(&request),
            Command::SetAccessory { kind, enabled } => match kind {
                Accessory::HotWire => self.state.outputs.hot_wire = enabled,
                Accessory::Fan => self.state.outputs.fan = enabled,
            },
            Command::SetWirePower(power) => self.state.outputs.hot_wire_power = power,
            Command::SetFanPower(power) => self.state.outputs.fan_power = power,
            Command::EmergencyStop => self.emergency_stop(now, "emergency stop requested"),
            Command::ReloadConfig => self.reload_config(),
        }
    }

    fn start_job(&mut self, now: Instant) {
        let config = self.store.snapshot();
        match self
            .job
            .start(now, &self.gate, config, &mut self.state, &mut self.axes)
        {
            Ok(()) => self.transition(ModeEvent::JobStarted),
            Err(e) => {
                self.state.record_message(&e.to_string());
                warn!(error = %e, "START refused, staying idle");
            }
        }
    }

    fn stop(&mut self) {
        match self.mode() {
            Mode::Running => self.job.request_stop(),
            Mode::Jog => {
                self.jog.abort(&mut self.axes);
                self.state.sync_position(&self.axes, &self.config);
                self.transition(ModeEvent::MotionAborted);
            }
            Mode::Homing => {
                self.homing.abort(&mut self.axes);
                self.state.sync_position(&self.axes, &self.config);
                self.transition(ModeEvent::MotionAborted);
            }
            _ => {}
        }
    }

    fn start_jog(&mut self, request: &JogRequest) {
        if self.jog.start(request, &self.config, &mut self.axes) {
            self.transition(ModeEvent::JogStarted);
        } else {
            debug!(x = request.x_mm, y = request.y_mm, "jog below one step, ignored");
        }
    }

    fn start_homing(&mut self, now: Instant) {
        self.state.homed = false;
        self.transition(ModeEvent::HomingStarted);
        match self.homing.start(now, &self.config, &mut self.axes) {
            HomingTickResult::InProgress => {}
            HomingTickResult::Success => self.finish_homing(),
            HomingTickResult::Failed { reason } => self.fail_homing(reason),
        }
    }

    fn finish_homing(&mut self) {
        self.state.homed = true;
        self.state.sync_position(&self.axes, &self.config);
        self.transition(ModeEvent::MotionComplete);
    }

    fn fail_homing(&mut self, reason: HomingFailReason) {
        self.axes.stop();
        self.state.sync_position(&self.axes, &self.config);
        self.state.outputs.force_off();
        let message = reason.describe();
        self.state.record_fault(reason.fault(), &message);
        error!(reason = %message, "homing failed");
        self.transition(ModeEvent::HomingFailed);
    }

    /// Abort everything, clear faults, outputs off, back to IDLE.
    ///
    /// From IDLE the logical position is zeroed as well.
    fn reset(&mut self, now: Instant) {
        let from_idle = self.mode() == Mode::Idle;
        self.abort_all(now);
        self.homing.reset();
        self.state.outputs.force_off();
        self.state.clear_faults();
        self.state.paused = false;
        self.state.positioning = Positioning::Absolute;
        if from_idle {
            self.axes.zero();
            self.state.x_mm = 0.0;
            self.state.y_mm = 0.0;
        }
        self.transition(ModeEvent::Reset);
        info!(from_idle, "machine reset");
    }

    fn emergency_stop(&mut self, now: Instant, reason: &str) {
        self.abort_all(now);
        self.state.outputs.force_off();
        self.state.paused = false;
        if !self.mode().is_latched() {
            self.state.record_fault(FaultFlags::EMERGENCY_STOP, reason);
            warn!(reason, mode = self.mode().name(), "emergency stop");
        }
        self.transition(ModeEvent::EmergencyStop);
    }

    fn reload_config(&mut self) {
        let config = self.store.snapshot();
        self.arbiter.set_timing(&config.timing);
        self.publisher.set_timing(&config.timing);
        self.config = config;
        info!("configuration snapshot refreshed");
    }

    /// Halt all motion and drop any job or controller in progress.
    fn abort_all(&mut self, now: Instant) {
        self.job.abort(now, &self.gate, &mut self.state, &mut self.axes);
        self.jog.abort(&mut self.axes);
        if self.homing.is_active() {
            self.homing.abort(&mut self.axes);
        }
        self.axes.stop();
        self.state.sync_position(&self.axes, &self.config);
    }

    // ─── Controllers ────────────────────────────────────────────────

    fn step_controller(&mut self, now: Instant) {
        match self.mode() {
            Mode::Running => {
                match self
                    .job
                    .tick(now, &self.gate, &mut self.state, &mut self.axes)
                {
                    JobTick::Finished => self.transition(ModeEvent::JobFinished),
                    JobTick::Stopped => self.transition(ModeEvent::JobStopped),
                    JobTick::Failed => self.transition(ModeEvent::JobFailed),
                    JobTick::Running | JobTick::Idle => {}
                }
            }
            Mode::Jog => {
                if self.jog.tick(&mut self.axes) == JogTick::Arrived {
                    self.state.sync_position(&self.axes, &self.config);
                    self.transition(ModeEvent::MotionComplete);
                }
            }
            Mode::Homing => {
                match self
                    .homing
                    .tick(now, &self.config, &mut self.axes, &self.io)
                {
                    HomingTickResult::InProgress => {}
                    HomingTickResult::Success => self.finish_homing(),
                    HomingTickResult::Failed { reason } => self.fail_homing(reason),
                }
            }
            Mode::Idle | Mode::Stopped | Mode::Error => {}
        }
    }

    fn transition(&mut self, event: ModeEvent) {
        let from = self.mode();
        match self.state.mode.handle_event(event) {
            TransitionResult::Ok(to) => {
                if from != to {
                    debug!(from = from.name(), to = to.name(), event = ?event, "mode transition");
                }
            }
            TransitionResult::Rejected(reason) => {
                debug!(mode = from.name(), event = ?event, reason, "mode event rejected");
            }
        }
    }
}
