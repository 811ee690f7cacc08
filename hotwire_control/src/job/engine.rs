//! Job engine: runs a G-code project one bounded unit of work per tick.
//!
//! ## Stage Flow
//!
//! ```text
//! start() ─► HEATING ─► MOVING_TO_OFFSET ─► READING_FILE ◄────────────┐
//!  (preheat_ms = 0 skips HEATING)               │                      │
//!                                               ▼                      │
//!                                        PROCESSING_LINE ──(no move)───┤
//!                                               │                      │
//!                                               ▼                      │
//!                                      EXECUTING_MOVEMENT ──(arrived)──┘
//!
//! EOF ─► FINISHED        read/parse error ─► ERROR        stop ─► IDLE
//! ```
//!
//! A tick performs at most one of: one file read of at most
//! `MAX_LINE_BYTES`, one line interpretation, or one step on each axis.
//! Storage access never blocks: a busy gate means the read is retried on the
//! next tick. A line that does not end within the read limit fails the job.

use std::time::{Duration, Instant};

use hotwire_common::consts::{ESTIMATED_BYTES_PER_LINE, MAX_LINE_BYTES};
use hotwire_common::machine::config::MachineConfig;
use hotwire_common::machine::state::{FaultFlags, JobStage};
use tracing::{error, info, trace, warn};

use super::gcode::{Block, PlannedMove, parse_line, plan_move};
use crate::error::{GcodeError, JobStartError, LineError};
use crate::hal::{AxisDriver, Axes};
use crate::state::runtime::{JobInfo, MachineState};
use crate::storage::{StorageDevice, StorageFile, StorageGate};

/// How long START may wait for the storage gate.
pub const START_GATE_TIMEOUT: Duration = Duration::from_millis(5);

/// Outcome of one engine tick, consumed by the Motion Task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTick {
    /// No job loaded.
    Idle,
    Running,
    /// End of file reached.
    Finished,
    /// Stop request honored; file closed, axes halted.
    Stopped,
    /// Read or parse error; fault latched.
    Failed,
}

/// Per-job execution state.
pub struct JobEngine<D: StorageDevice> {
    stage: JobStage,
    config: MachineConfig,
    file: Option<D::File>,
    line: String,
    line_number: u32,
    estimated_total: u32,
    progress: f32,
    stop_requested: bool,
    paused: bool,
    pending: Option<PlannedMove>,
    modal_feed: Option<f64>,
    offset_issued: bool,
    heat_until: Option<Instant>,
    run_time: Duration,
    resumed_at: Option<Instant>,
}

impl<D: StorageDevice> Default for JobEngine<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: StorageDevice> JobEngine<D> {
    pub fn new() -> Self {
        Self {
            stage: JobStage::Idle,
            config: MachineConfig::default(),
            file: None,
            line: String::with_capacity(128),
            line_number: 0,
            estimated_total: 0,
            progress: 0.0,
            stop_requested: false,
            paused: false,
            pending: None,
            modal_feed: None,
            offset_issued: false,
            heat_until: None,
            run_time: Duration::ZERO,
            resumed_at: None,
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────

    #[inline]
    pub fn stage(&self) -> JobStage {
        self.stage
    }

    /// A job is loaded and not yet terminal.
    pub fn is_active(&self) -> bool {
        self.stage != JobStage::Idle && !self.stage.is_terminal()
    }

    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    pub fn estimated_total(&self) -> u32 {
        self.estimated_total
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn modal_feed(&self) -> Option<f64> {
        self.modal_feed
    }

    pub fn file_open(&self) -> bool {
        self.file.is_some()
    }

    /// Run time excluding pauses, as of `now`.
    pub fn run_time(&self, now: Instant) -> Duration {
        match self.resumed_at {
            Some(t) => self.run_time + now.saturating_duration_since(t),
            None => self.run_time,
        }
    }

    // ─── Control ────────────────────────────────────────────────────

    /// Open the selected project and enter the first stage.
    ///
    /// `config` is the snapshot the whole job runs with.
    pub fn start<A: AxisDriver>(
        &mut self,
        now: Instant,
        gate: &StorageGate<D>,
        config: MachineConfig,
        state: &mut MachineState,
        axes: &mut Axes<A>,
    ) -> Result<(), JobStartError> {
        let project = gate
            .selected_project()
            .ok_or(JobStartError::NoProjectSelected)?;
        let path = format!(
            "{}/{}",
            config.projects_dir.trim_end_matches('/'),
            project.as_str()
        );

        let file = {
            let mut device = gate
                .try_acquire(START_GATE_TIMEOUT)
                .ok_or(JobStartError::StorageBusy)?;
            device.open_for_read(&path)?
        };
        let size = file.size();

        *self = Self::new();
        self.file = Some(file);
        self.estimated_total = (size / ESTIMATED_BYTES_PER_LINE).clamp(1, u32::MAX as u64) as u32;
        self.resumed_at = Some(now);

        if config.job.preheat_ms > 0 {
            self.heat_until = Some(now + Duration::from_millis(config.job.preheat_ms));
            state.outputs.hot_wire = true;
            self.stage = JobStage::Heating;
        } else {
            self.stage = JobStage::MovingToOffset;
        }
        self.config = config;

        state.paused = false;
        state.job = JobInfo {
            project,
            current_line: 0,
            total_lines: self.estimated_total,
            progress: 0.0,
            run_time: Duration::ZERO,
        };
        axes.stop();

        info!(
            path = %path,
            size,
            estimated_lines = self.estimated_total,
            stage = ?self.stage,
            "job started"
        );
        Ok(())
    }

    /// Ask the job to stop; honored at the start of the next tick.
    pub fn request_stop(&mut self) {
        if self.is_active() {
            self.stop_requested = true;
        }
    }

    /// Flip the pause flag. Run time does not accrue while paused.
    pub fn toggle_pause(&mut self, now: Instant, state: &mut MachineState) {
        let paused = !self.paused;
        self.set_paused(now, paused, state);
    }

    fn set_paused(&mut self, now: Instant, paused: bool, state: &mut MachineState) {
        if paused == self.paused {
            return;
        }
        self.paused = paused;
        if paused {
            self.freeze(now);
        } else {
            self.resumed_at = Some(now);
        }
        state.paused = paused;
        info!(paused, line = self.line_number, "job pause toggled");
    }

    /// Abandon the job immediately (RESET / emergency stop).
    pub fn abort<A: AxisDriver>(
        &mut self,
        now: Instant,
        gate: &StorageGate<D>,
        state: &mut MachineState,
        axes: &mut Axes<A>,
    ) {
        if self.stage == JobStage::Idle {
            return;
        }
        let active = self.is_active();
        self.close_file(gate);
        if active {
            axes.stop();
            state.sync_position(axes, &self.config);
            self.freeze(now);
            warn!(line = self.line_number, stage = ?self.stage, "job aborted");
        }
        self.pending = None;
        self.stop_requested = false;
        self.paused = false;
        self.stage = JobStage::Idle;
        self.publish(now, state);
    }

    // ─── Tick ───────────────────────────────────────────────────────

    /// Advance the job by one unit of work.
    pub fn tick<A: AxisDriver>(
        &mut self,
        now: Instant,
        gate: &StorageGate<D>,
        state: &mut MachineState,
        axes: &mut Axes<A>,
    ) -> JobTick {
        if self.stop_requested {
            self.close_file(gate);
            axes.stop();
            state.sync_position(axes, &self.config);
            state.outputs.hot_wire = false;
            state.paused = false;
            self.freeze(now);
            self.pending = None;
            self.stop_requested = false;
            self.paused = false;
            self.stage = JobStage::Idle;
            self.publish(now, state);
            info!(line = self.line_number, "job stopped");
            return JobTick::Stopped;
        }

        let result = match self.stage {
            JobStage::Idle => return JobTick::Idle,
            JobStage::Finished => return JobTick::Finished,
            JobStage::Error => return JobTick::Failed,
            _ if self.paused => JobTick::Running,
            JobStage::Heating => self.heat(now),
            JobStage::MovingToOffset => self.move_to_offset(state, axes),
            JobStage::ReadingFile => self.read_line(now, gate, state, axes),
            JobStage::ProcessingLine => self.process_line(now, gate, state, axes),
            JobStage::ExecutingMovement => self.execute_movement(state, axes),
        };
        self.publish(now, state);
        result
    }

    fn heat(&mut self, now: Instant) -> JobTick {
        if self.heat_until.is_none_or(|t| now >= t) {
            self.heat_until = None;
            self.stage = JobStage::MovingToOffset;
        }
        JobTick::Running
    }

    fn move_to_offset<A: AxisDriver>(
        &mut self,
        state: &mut MachineState,
        axes: &mut Axes<A>,
    ) -> JobTick {
        let (ox, oy) = (self.config.x.offset, self.config.y.offset);
        if ox == 0.0 && oy == 0.0 {
            self.stage = JobStage::ReadingFile;
            return JobTick::Running;
        }

        if !self.offset_issued {
            axes.x.set_motion_profile(self.config.x.rapid_profile());
            axes.y.set_motion_profile(self.config.y.rapid_profile());
            axes.x.move_absolute(self.config.x.to_steps(ox));
            axes.y.move_absolute(self.config.y.to_steps(oy));
            self.offset_issued = true;
            return JobTick::Running;
        }

        axes.advance();
        if axes.arrived() {
            state.x_mm = ox;
            state.y_mm = oy;
            self.stage = JobStage::ReadingFile;
            trace!(x = ox, y = oy, "offset reached");
        }
        JobTick::Running
    }

    fn read_line<A: AxisDriver>(
        &mut self,
        now: Instant,
        gate: &StorageGate<D>,
        state: &mut MachineState,
        axes: &mut Axes<A>,
    ) -> JobTick {
        let Some(mut device) = gate.try_acquire(Duration::ZERO) else {
            trace!(line = self.line_number, "storage busy, read deferred");
            return JobTick::Running;
        };
        let Some(file) = self.file.as_mut() else {
            drop(device);
            return self.fail(now, state, axes, FaultFlags::STORAGE, "job file not open");
        };

        self.line.clear();
        let read = device.read_line(file, &mut self.line, MAX_LINE_BYTES);
        let (position, size) = (file.position(), file.size());

        match read {
            Ok(0) => {
                if let Some(file) = self.file.take() {
                    device.close(file);
                }
                drop(device);
                self.progress = 100.0;
                self.freeze(now);
                self.stage = JobStage::Finished;
                state.outputs.hot_wire = false;
                info!(lines = self.line_number, "job finished");
                JobTick::Finished
            }
            Ok(n) if n >= MAX_LINE_BYTES && !self.line.ends_with('\n') => {
                if let Some(file) = self.file.take() {
                    device.close(file);
                }
                drop(device);
                self.line_number += 1;
                let err = LineError {
                    line: self.line_number,
                    error: GcodeError::LineTooLong(MAX_LINE_BYTES),
                };
                self.fail(now, state, axes, FaultFlags::GCODE, &err.to_string())
            }
            Ok(_) => {
                drop(device);
                self.line_number += 1;
                if self.line_number > self.estimated_total {
                    self.estimated_total = self.line_number;
                }
                if size > 0 {
                    let pct = (position as f64 / size as f64 * 100.0).clamp(0.0, 100.0) as f32;
                    self.progress = self.progress.max(pct);
                }
                self.stage = JobStage::ProcessingLine;
                JobTick::Running
            }
            Err(e) => {
                drop(device);
                let msg = format!("read failed after line {}: {e}", self.line_number);
                self.fail(now, state, axes, FaultFlags::STORAGE, &msg)
            }
        }
    }

    fn process_line<A: AxisDriver>(
        &mut self,
        now: Instant,
        gate: &StorageGate<D>,
        state: &mut MachineState,
        axes: &mut Axes<A>,
    ) -> JobTick {
        match self.interpret(now, state, axes) {
            Ok(Some(planned)) => {
                axes.x.set_motion_profile(planned.x_profile);
                axes.y.set_motion_profile(planned.y_profile);
                axes.x.move_absolute(planned.x_steps);
                axes.y.move_absolute(planned.y_steps);
                self.pending = Some(planned);
                self.stage = JobStage::ExecutingMovement;
                JobTick::Running
            }
            Ok(None) => {
                self.stage = JobStage::ReadingFile;
                JobTick::Running
            }
            Err(error) => {
                self.close_file(gate);
                let err = LineError {
                    line: self.line_number,
                    error,
                };
                self.fail(now, state, axes, FaultFlags::GCODE, &err.to_string())
            }
        }
    }

    /// Apply a non-motion word, or plan a move.
    fn interpret<A: AxisDriver>(
        &mut self,
        now: Instant,
        state: &mut MachineState,
        axes: &mut Axes<A>,
    ) -> Result<Option<PlannedMove>, GcodeError> {
        let Some(block) = parse_line(&self.line)? else {
            return Ok(None);
        };
        let use_feed = self.config.job.use_gcode_feed_rate;

        match block {
            Block::Move(word) => {
                if use_feed && word.feed.is_some() {
                    self.modal_feed = word.feed;
                }
                let planned = plan_move(
                    &self.config,
                    [state.x_mm, state.y_mm],
                    state.positioning,
                    &word,
                    self.modal_feed,
                );
                return Ok(Some(planned));
            }
            Block::SoftHome => {
                axes.zero();
                state.x_mm = 0.0;
                state.y_mm = 0.0;
            }
            Block::SetPositioning(p) => state.positioning = p,
            Block::Pause => self.set_paused(now, true, state),
            Block::HotWire { on, power } => {
                if let Some(p) = power {
                    state.outputs.hot_wire_power = p;
                }
                state.outputs.hot_wire = on;
            }
            Block::Fan { on, power } => {
                if let Some(p) = power {
                    state.outputs.fan_power = p;
                }
                state.outputs.fan = on;
            }
            Block::FeedRate(f) => {
                if use_feed {
                    self.modal_feed = Some(f);
                }
            }
        }
        Ok(None)
    }

    fn execute_movement<A: AxisDriver>(
        &mut self,
        state: &mut MachineState,
        axes: &mut Axes<A>,
    ) -> JobTick {
        axes.advance();
        if axes.arrived() {
            if let Some(planned) = self.pending.take() {
                state.x_mm = planned.x_mm;
                state.y_mm = planned.y_mm;
            }
            self.stage = JobStage::ReadingFile;
        }
        JobTick::Running
    }

    // ─── Helpers ────────────────────────────────────────────────────

    fn fail<A: AxisDriver>(
        &mut self,
        now: Instant,
        state: &mut MachineState,
        axes: &mut Axes<A>,
        fault: FaultFlags,
        message: &str,
    ) -> JobTick {
        self.file = None;
        self.pending = None;
        axes.stop();
        state.sync_position(axes, &self.config);
        state.outputs.hot_wire = false;
        state.record_fault(fault, message);
        self.freeze(now);
        self.stage = JobStage::Error;
        error!(fault = ?fault, "job failed: {message}");
        JobTick::Failed
    }

    /// Close the file through the device if the gate is free, else drop it.
    fn close_file(&mut self, gate: &StorageGate<D>) {
        if let Some(file) = self.file.take() {
            match gate.try_acquire(Duration::ZERO) {
                Some(mut device) => device.close(file),
                None => drop(file),
            }
        }
    }

    fn freeze(&mut self, now: Instant) {
        if let Some(t) = self.resumed_at.take() {
            self.run_time += now.saturating_duration_since(t);
        }
    }

    fn publish(&self, now: Instant, state: &mut MachineState) {
        state.job.current_line = self.line_number;
        state.job.total_lines = self.estimated_total;
        state.job.progress = self.progress;
        state.job.run_time = self.run_time(now);
    }
}
