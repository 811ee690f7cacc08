//! Machine state enums and the status snapshot.
//!
//! `Mode` is the top-level operating state, `JobStage` and `HomingStage`
//! are the sub-states of the job engine and homing controller. A
//! `StatusSnapshot` is the read-only copy of all of it that crosses the
//! Status Channel.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::consts::{ERROR_MESSAGE_LEN, PROJECT_NAME_LEN};

// ─── Mode ───────────────────────────────────────────────────────────

/// Top-level operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Mode {
    /// Ready; accepts START, JOG, HOME, ZERO, RESET.
    #[default]
    Idle = 0,
    /// Job executing.
    Running = 1,
    /// Jog move in progress.
    Jog = 2,
    /// Homing sequence in progress.
    Homing = 3,
    /// Halted by STOP or emergency stop; RESET required.
    Stopped = 4,
    /// Job-fatal or safety-fatal failure; RESET required.
    Error = 5,
}

impl Mode {
    /// Modes in which axes may be moving.
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Jog | Self::Homing)
    }

    /// Modes that only RESET leaves.
    #[inline]
    pub const fn is_latched(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Jog => "JOG",
            Self::Homing => "HOMING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        }
    }
}

// ─── Job Stage ──────────────────────────────────────────────────────

/// Job engine pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum JobStage {
    /// No job.
    #[default]
    Idle = 0,
    /// Waiting for the wire to reach temperature.
    Heating = 1,
    /// Rapid move to the configured offset.
    MovingToOffset = 2,
    /// Reading the next line under the storage gate.
    ReadingFile = 3,
    /// Interpreting the line just read.
    ProcessingLine = 4,
    /// Waiting for both axes to arrive.
    ExecutingMovement = 5,
    /// End of file reached.
    Finished = 6,
    /// Job-fatal failure.
    Error = 7,
}

impl JobStage {
    /// Terminal stages keep run time frozen.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

// ─── Homing ─────────────────────────────────────────────────────────

/// Axis identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::X => "X",
            Self::Y => "Y",
        }
    }
}

/// Homing sequence stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HomingStage {
    /// Not homing.
    #[default]
    Idle,
    /// Driving toward the limit switch.
    MovingToLimit(Axis),
    /// Moving away from the triggered switch.
    BackingOff(Axis),
    /// Both axes referenced.
    Finished,
    /// Limit not found in time.
    Error,
}

// ─── Positioning ────────────────────────────────────────────────────

/// G90/G91 positioning mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Positioning {
    #[default]
    Absolute,
    Relative,
}

// ─── Fault Flags ────────────────────────────────────────────────────

bitflags! {
    /// Latched fault causes, cleared by RESET.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FaultFlags: u8 {
        /// Line interpretation failed.
        const GCODE          = 0x01;
        /// Storage open/read failed mid-job.
        const STORAGE        = 0x02;
        /// Limit switch not reached within the homing timeout.
        const HOMING_TIMEOUT = 0x04;
        /// Emergency stop (command or input).
        const EMERGENCY_STOP = 0x08;
        /// Limit switch still asserted after back-off.
        const LIMIT_FAULT    = 0x10;
    }
}

// ─── Bounded strings ────────────────────────────────────────────────

/// Copy `text` into a fixed-capacity string, truncating at a char boundary.
pub fn bounded<const N: usize>(text: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for ch in text.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// Project name as carried in snapshots.
pub type ProjectName = heapless::String<PROJECT_NAME_LEN>;

/// Error message as carried in snapshots.
pub type ErrorMessage = heapless::String<ERROR_MESSAGE_LEN>;

// ─── Status Snapshot ────────────────────────────────────────────────

/// Read-only copy of the machine state published on the Status Channel.
///
/// Fixed-size: cloning never allocates.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StatusSnapshot {
    /// Publication sequence number.
    pub seq: u64,
    pub mode: Mode,
    pub job_stage: JobStage,
    pub homing_stage: HomingStage,
    /// Logical X position [mm].
    pub x_mm: f64,
    /// Logical Y position [mm].
    pub y_mm: f64,
    pub positioning: Positioning,
    pub paused: bool,
    pub homed: bool,
    pub faults: FaultFlags,
    pub hot_wire_on: bool,
    pub hot_wire_power: u8,
    pub fan_on: bool,
    pub fan_power: u8,
    pub project: ProjectName,
    pub current_line: u32,
    pub total_lines: u32,
    /// Job progress [0, 100].
    pub progress: f32,
    /// Job run time excluding pauses [ms].
    pub run_time_ms: u64,
    pub last_error: ErrorMessage,
    /// Commands dropped for exceeding the staleness window.
    pub stale_commands: u32,
    /// Commands discarded as illegal for the mode, or for a full arbiter.
    pub discarded_commands: u32,
    /// Snapshots dropped on a full Status Channel.
    pub status_dropped: u32,
    /// Ticks that exceeded their budget.
    pub tick_overruns: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_classes() {
        assert!(Mode::Running.is_active());
        assert!(Mode::Homing.is_active());
        assert!(!Mode::Idle.is_active());
        assert!(Mode::Stopped.is_latched());
        assert!(Mode::Error.is_latched());
        assert!(!Mode::Jog.is_latched());
    }

    #[test]
    fn terminal_stages() {
        assert!(JobStage::Finished.is_terminal());
        assert!(JobStage::Error.is_terminal());
        assert!(!JobStage::ReadingFile.is_terminal());
    }

    #[test]
    fn bounded_truncates_on_char_boundary() {
        let s: heapless::String<4> = bounded("abcdef");
        assert_eq!(s.as_str(), "abcd");
        let s: heapless::String<3> = bounded("aé€");
        assert_eq!(s.as_str(), "aé");
    }

    #[test]
    fn fault_flags_default_empty() {
        let mut f = FaultFlags::default();
        assert!(f.is_empty());
        f |= FaultFlags::GCODE | FaultFlags::EMERGENCY_STOP;
        assert!(f.contains(FaultFlags::GCODE));
        f = FaultFlags::empty();
        assert!(f.is_empty());
    }
}
