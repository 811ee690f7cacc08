//! Machine configuration structures.
//!
//! All config types use `serde::Deserialize` for TOML loading. Every table
//! and field has a default so a partial file is accepted; `validate()`
//! rejects values the motion code cannot work with.
//!
//! Feed rates are in mm/min, accelerations in mm/s², distances in mm.

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, LogLevel};
use crate::consts::{
    ACTIVE_TICK_BUDGET_MS, COMMAND_POLL_MS, COMMAND_STALE_MS, DEFAULT_PROJECTS_DIR,
    IDLE_TICK_BUDGET_MS,
};

// ─── Motion Profile ─────────────────────────────────────────────────

/// Speed/acceleration pair handed to an axis driver, in step units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionProfile {
    /// Maximum speed [steps/s].
    pub max_speed: f64,
    /// Acceleration [steps/s²].
    pub acceleration: f64,
}

// ─── Axis Config ────────────────────────────────────────────────────

/// Per-axis kinematic configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisConfig {
    /// Steps per millimetre.
    pub steps_per_mm: f64,
    /// G0 feed rate [mm/min].
    pub rapid_feed_rate: f64,
    /// G0 acceleration [mm/s²].
    pub rapid_acceleration: f64,
    /// G1 feed rate ceiling [mm/min].
    pub work_feed_rate: f64,
    /// G1 acceleration [mm/s²].
    pub work_acceleration: f64,
    /// Position reached after preheat, before the program starts [mm].
    pub offset: f64,
    /// Usable travel of the axis [mm].
    pub max_travel: f64,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: 80.0,
            rapid_feed_rate: 1000.0,
            rapid_acceleration: 200.0,
            work_feed_rate: 300.0,
            work_acceleration: 100.0,
            offset: 0.0,
            max_travel: 800.0,
        }
    }
}

impl AxisConfig {
    /// Millimetres to the nearest whole step.
    #[inline]
    pub fn to_steps(&self, mm: f64) -> i64 {
        (mm * self.steps_per_mm).round() as i64
    }

    /// Steps to millimetres.
    #[inline]
    pub fn to_mm(&self, steps: i64) -> f64 {
        steps as f64 / self.steps_per_mm
    }

    /// Feed rate [mm/min] to step rate [steps/s].
    #[inline]
    pub fn step_rate(&self, feed_mm_per_min: f64) -> f64 {
        feed_mm_per_min / 60.0 * self.steps_per_mm
    }

    /// Profile for the given feed [mm/min] and acceleration [mm/s²].
    pub fn profile(&self, feed_mm_per_min: f64, accel_mm_s2: f64) -> MotionProfile {
        MotionProfile {
            max_speed: self.step_rate(feed_mm_per_min),
            acceleration: accel_mm_s2 * self.steps_per_mm,
        }
    }

    /// G0 profile.
    pub fn rapid_profile(&self) -> MotionProfile {
        self.profile(self.rapid_feed_rate, self.rapid_acceleration)
    }

    /// G1 profile at the configured work rate.
    pub fn work_profile(&self) -> MotionProfile {
        self.profile(self.work_feed_rate, self.work_acceleration)
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let positive = [
            ("steps_per_mm", self.steps_per_mm),
            ("rapid_feed_rate", self.rapid_feed_rate),
            ("rapid_acceleration", self.rapid_acceleration),
            ("work_feed_rate", self.work_feed_rate),
            ("work_acceleration", self.work_acceleration),
            ("max_travel", self.max_travel),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "{name}.{field} must be positive, got {value}"
                )));
            }
        }
        if !self.offset.is_finite() {
            return Err(ConfigError::ValidationError(format!(
                "{name}.offset must be finite"
            )));
        }
        Ok(())
    }
}

// ─── Homing ─────────────────────────────────────────────────────────

/// Direction travelled while seeking the limit switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HomingDirection {
    /// Seek toward the negative end.
    #[default]
    Negative,
    /// Seek toward the positive end.
    Positive,
}

impl HomingDirection {
    /// Sign multiplier for seek moves.
    #[inline]
    pub const fn sign(&self) -> i64 {
        match self {
            Self::Positive => 1,
            Self::Negative => -1,
        }
    }
}

/// Limit-seek homing parameters, shared by both axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomingConfig {
    /// Seek speed [mm/min].
    pub speed: f64,
    /// Back-off speed [mm/min].
    pub slow_speed: f64,
    /// Distance travelled away from the switch after it triggers [mm].
    pub backoff: f64,
    /// Allowance on top of the nominal duration (distance / speed) of each
    /// seek or back-off phase before it counts as timed out [ms].
    pub timeout_ms: u64,
    /// Seek direction.
    pub direction: HomingDirection,
}

impl Default for HomingConfig {
    fn default() -> Self {
        Self {
            speed: 300.0,
            slow_speed: 60.0,
            backoff: 5.0,
            timeout_ms: 10_000,
            direction: HomingDirection::Negative,
        }
    }
}

// ─── Safety ─────────────────────────────────────────────────────────

/// Electrical type of the limit switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LimitSwitchType {
    /// Input reads high when the switch is pressed.
    #[default]
    NormallyOpen,
    /// Input reads low when the switch is pressed.
    NormallyClosed,
}

impl LimitSwitchType {
    /// Whether a raw input level means "switch pressed".
    #[inline]
    pub const fn is_triggered(&self, raw_level: bool) -> bool {
        match self {
            Self::NormallyOpen => raw_level,
            Self::NormallyClosed => !raw_level,
        }
    }
}

/// Safety switch policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SafetyConfig {
    /// Ignore the physical emergency-stop input.
    pub deactivate_estop: bool,
    /// Ignore limit switches (homing then only re-references).
    pub deactivate_limit_switches: bool,
    /// Limit switch polarity.
    pub limit_switch_type: LimitSwitchType,
}

// ─── Job ────────────────────────────────────────────────────────────

/// Job execution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Honor `F` words (clamped to the work feed rate).
    pub use_gcode_feed_rate: bool,
    /// Hot-wire preheat before the offset move [ms]; 0 skips preheat.
    pub preheat_ms: u64,
    /// Default hot-wire power (0-255).
    pub hot_wire_power: u8,
    /// Default fan power (0-255).
    pub fan_power: u8,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            use_gcode_feed_rate: true,
            preheat_ms: 0,
            hot_wire_power: 255,
            fan_power: 255,
        }
    }
}

// ─── Timing ─────────────────────────────────────────────────────────

/// Task loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Interval between executed (non-emergency) commands [ms].
    pub command_poll_ms: u64,
    /// Commands older than this are dropped unexecuted [ms].
    pub command_stale_ms: u64,
    /// Motion Task sleep while axes move [µs].
    pub active_tick_us: u64,
    /// Motion Task sleep otherwise [ms].
    pub idle_tick_ms: u64,
    /// Status cadence in RUNNING/JOG/HOMING [ms].
    pub status_active_ms: u64,
    /// Status cadence otherwise [ms].
    pub status_idle_ms: u64,
    /// Tick budget while axes move [ms].
    pub active_budget_ms: u64,
    /// Tick budget otherwise [ms].
    pub idle_budget_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            command_poll_ms: COMMAND_POLL_MS,
            command_stale_ms: COMMAND_STALE_MS,
            active_tick_us: 250,
            idle_tick_ms: 10,
            status_active_ms: 100,
            status_idle_ms: 500,
            active_budget_ms: ACTIVE_TICK_BUDGET_MS,
            idle_budget_ms: IDLE_TICK_BUDGET_MS,
        }
    }
}

// ─── Machine Config ─────────────────────────────────────────────────

/// Complete machine configuration.
///
/// The Motion Task takes an owned snapshot at job start (and on
/// `RELOAD_CONFIG`), so a running job never observes later edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Default log level.
    pub log_level: LogLevel,
    /// Directory holding G-code projects, relative to the storage root.
    pub projects_dir: String,
    /// X axis.
    pub x: AxisConfig,
    /// Y axis.
    pub y: AxisConfig,
    /// Homing parameters.
    pub homing: HomingConfig,
    /// Safety switch policy.
    pub safety: SafetyConfig,
    /// Job execution policy.
    pub job: JobConfig,
    /// Loop timing.
    pub timing: TimingConfig,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            projects_dir: DEFAULT_PROJECTS_DIR.to_string(),
            x: AxisConfig::default(),
            y: AxisConfig::default(),
            homing: HomingConfig::default(),
            safety: SafetyConfig::default(),
            job: JobConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl MachineConfig {
    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.x.validate("x")?;
        self.y.validate("y")?;

        let h = &self.homing;
        if !(h.speed > 0.0 && h.slow_speed > 0.0) {
            return Err(ConfigError::ValidationError(
                "homing speeds must be positive".to_string(),
            ));
        }
        if !(h.backoff.is_finite() && h.backoff >= 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "homing.backoff must be non-negative, got {}",
                h.backoff
            )));
        }
        if h.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "homing.timeout_ms must be non-zero".to_string(),
            ));
        }

        let t = &self.timing;
        let timing = [
            ("command_poll_ms", t.command_poll_ms),
            ("command_stale_ms", t.command_stale_ms),
            ("active_tick_us", t.active_tick_us),
            ("idle_tick_ms", t.idle_tick_ms),
            ("status_active_ms", t.status_active_ms),
            ("status_idle_ms", t.status_idle_ms),
            ("active_budget_ms", t.active_budget_ms),
            ("idle_budget_ms", t.idle_budget_ms),
        ];
        for (field, value) in timing {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "timing.{field} must be non-zero"
                )));
            }
        }

        if self.projects_dir.is_empty() {
            return Err(ConfigError::ValidationError(
                "projects_dir cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
