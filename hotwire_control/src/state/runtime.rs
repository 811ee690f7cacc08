//! Runtime machine record.
//!
//! `MachineState` is owned exclusively by the Motion Task. The logical
//! position is written only after a driver reports zero remaining steps (or
//! after a halt), never ahead of the driver.

use std::time::Duration;

use hotwire_common::machine::config::MachineConfig;
use hotwire_common::machine::state::{
    ErrorMessage, FaultFlags, HomingStage, JobStage, Mode, Positioning, ProjectName,
    StatusSnapshot, bounded,
};

use super::machine::ModeMachine;
use crate::hal::{AxisDriver, Axes, Outputs};

/// Identity and progress of the current (or last) job.
#[derive(Debug, Clone, Default)]
pub struct JobInfo {
    pub project: ProjectName,
    /// Last line read (1-based).
    pub current_line: u32,
    /// Estimated total lines.
    pub total_lines: u32,
    /// Progress [0, 100], non-decreasing within a job.
    pub progress: f32,
    /// Run time excluding pauses; frozen once the job ends.
    pub run_time: Duration,
}

/// Motion-side diagnostic counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub stale_commands: u32,
    pub discarded_commands: u32,
    pub tick_overruns: u32,
}

/// Mutable machine state.
#[derive(Debug, Clone)]
pub struct MachineState {
    pub mode: ModeMachine,
    /// Logical X position [mm].
    pub x_mm: f64,
    /// Logical Y position [mm].
    pub y_mm: f64,
    pub positioning: Positioning,
    pub paused: bool,
    pub homed: bool,
    pub faults: FaultFlags,
    pub last_error: ErrorMessage,
    pub outputs: Outputs,
    pub job: JobInfo,
    pub counters: Counters,
}

impl MachineState {
    pub fn new(config: &MachineConfig) -> Self {
        Self {
            mode: ModeMachine::new(),
            x_mm: 0.0,
            y_mm: 0.0,
            positioning: Positioning::Absolute,
            paused: false,
            homed: false,
            faults: FaultFlags::empty(),
            last_error: ErrorMessage::new(),
            outputs: Outputs::off(config.job.hot_wire_power, config.job.fan_power),
            job: JobInfo::default(),
            counters: Counters::default(),
        }
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode.mode()
    }

    /// Latch a fault and keep its message for status reporting.
    pub fn record_fault(&mut self, fault: FaultFlags, message: &str) {
        self.faults |= fault;
        self.last_error = bounded(message);
    }

    /// Keep a message for status reporting without latching a fault.
    pub fn record_message(&mut self, message: &str) {
        self.last_error = bounded(message);
    }

    pub fn clear_faults(&mut self) {
        self.faults = FaultFlags::empty();
        self.last_error.clear();
    }

    /// Take the logical position from the drivers' step counters.
    pub fn sync_position<A: AxisDriver>(&mut self, axes: &Axes<A>, config: &MachineConfig) {
        self.x_mm = config.x.to_mm(axes.x.current_position());
        self.y_mm = config.y.to_mm(axes.y.current_position());
    }

    /// Status snapshot; `seq` and `status_dropped` are filled by the publisher.
    pub fn snapshot(&self, job_stage: JobStage, homing_stage: HomingStage) -> StatusSnapshot {
        StatusSnapshot {
            seq: 0,
            mode: self.mode(),
            job_stage,
            homing_stage,
            x_mm: self.x_mm,
            y_mm: self.y_mm,
            positioning: self.positioning,
            paused: self.paused,
            homed: self.homed,
            faults: self.faults,
            hot_wire_on: self.outputs.hot_wire,
            hot_wire_power: self.outputs.hot_wire_power,
            fan_on: self.outputs.fan,
            fan_power: self.outputs.fan_power,
            project: self.job.project.clone(),
            current_line: self.job.current_line,
            total_lines: self.job.total_lines,
            progress: self.job.progress,
            run_time_ms: self.job.run_time.as_millis() as u64,
            last_error: self.last_error.clone(),
            stale_commands: self.counters.stale_commands,
            discarded_commands: self.counters.discarded_commands,
            status_dropped: 0,
            tick_overruns: self.counters.tick_overruns,
        }
    }
}
