//! Homing controller.
//!
//! Limit-seeking home, one axis at a time (X then Y):
//!
//! 1. **MovingToLimit**: drive toward the configured end at the homing
//!    speed until the limit input (after NO/NC polarity) is asserted. The
//!    seek distance is 1.5 × `max_travel`; running out of distance means
//!    the switch was missed.
//! 2. **BackingOff**: move `backoff` mm away at the slow speed. The switch
//!    must be released when the back-off ends.
//! 3. Zero the axis' logical position and continue with the next axis.
//!
//! Each seek/back-off phase has its own deadline: the nominal duration of
//! the phase move (distance / speed) plus the `timeout_ms` allowance. With
//! `deactivate_limit_switches` set, homing degenerates to zeroing both axes
//! without motion.
//!
//! ## Lifecycle
//!
//! 1. `start()` issues the first seek → mode HOMING
//! 2. `tick()` once per Motion Task tick → one step + sensor check
//! 3. On success the caller sets `homed` and the logical position to 0
//! 4. On failure the caller latches the fault and enters ERROR

use std::time::{Duration, Instant};

use hotwire_common::machine::config::{AxisConfig, MachineConfig, MotionProfile};
use hotwire_common::machine::state::{Axis, FaultFlags, HomingStage};
use tracing::{debug, info, warn};

use crate::hal::{AxisDriver, Axes, MachineIo};

/// Seek distance as a multiple of the axis travel.
const SEEK_TRAVEL_FACTOR: f64 = 1.5;

// ─── Results ────────────────────────────────────────────────────────

/// Result of one homing tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingTickResult {
    InProgress,
    /// Both axes referenced and zeroed.
    Success,
    Failed { reason: HomingFailReason },
}

/// Reason for a homing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingFailReason {
    /// Phase deadline exceeded.
    Timeout(Axis),
    /// Seek distance exhausted without the switch asserting.
    LimitNotFound(Axis),
    /// Switch still asserted after the back-off.
    LimitStuck(Axis),
}

impl HomingFailReason {
    /// Fault flag latched for this failure.
    pub const fn fault(&self) -> FaultFlags {
        match self {
            Self::Timeout(_) | Self::LimitNotFound(_) => FaultFlags::HOMING_TIMEOUT,
            Self::LimitStuck(_) => FaultFlags::LIMIT_FAULT,
        }
    }

    /// Operator-facing description.
    pub fn describe(&self) -> String {
        match self {
            Self::Timeout(axis) => format!("homing timeout on {} axis", axis.name()),
            Self::LimitNotFound(axis) => {
                format!("{} limit switch not found within travel", axis.name())
            }
            Self::LimitStuck(axis) => {
                format!("{} limit switch still asserted after back-off", axis.name())
            }
        }
    }
}

// ─── Controller ─────────────────────────────────────────────────────

/// Limit-seeking homing sequencer.
#[derive(Debug, Default)]
pub struct HomingController {
    stage: HomingStage,
    deadline: Option<Instant>,
    failure: Option<HomingFailReason>,
}

impl HomingController {
    pub const fn new() -> Self {
        Self {
            stage: HomingStage::Idle,
            deadline: None,
            failure: None,
        }
    }

    /// Reason of the last failure, while in `HomingStage::Error`.
    #[inline]
    pub const fn failure(&self) -> Option<HomingFailReason> {
        self.failure
    }

    #[inline]
    pub const fn stage(&self) -> HomingStage {
        self.stage
    }

    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(
            self.stage,
            HomingStage::MovingToLimit(_) | HomingStage::BackingOff(_)
        )
    }

    /// Begin the sequence.
    ///
    /// Returns `Success` right away when limit switches are deactivated.
    pub fn start<A: AxisDriver>(
        &mut self,
        now: Instant,
        config: &MachineConfig,
        axes: &mut Axes<A>,
    ) -> HomingTickResult {
        self.failure = None;
        if config.safety.deactivate_limit_switches {
            axes.stop();
            axes.zero();
            self.stage = HomingStage::Finished;
            info!("limit switches deactivated, axes zeroed without motion");
            return HomingTickResult::Success;
        }
        self.begin_seek(Axis::X, now, config, axes);
        HomingTickResult::InProgress
    }

    /// One bounded step of the sequence.
    pub fn tick<A: AxisDriver, I: MachineIo>(
        &mut self,
        now: Instant,
        config: &MachineConfig,
        axes: &mut Axes<A>,
        io: &I,
    ) -> HomingTickResult {
        match self.stage {
            HomingStage::Idle => HomingTickResult::InProgress,
            HomingStage::Finished => HomingTickResult::Success,
            HomingStage::Error => HomingTickResult::Failed {
                reason: self.failure.unwrap_or(HomingFailReason::Timeout(Axis::X)),
            },

            HomingStage::MovingToLimit(axis) => {
                if limit_pressed(axis, config, io) {
                    self.begin_backoff(axis, now, config, axes);
                    return HomingTickResult::InProgress;
                }
                if self.expired(now) {
                    return self.fail(HomingFailReason::Timeout(axis), axes);
                }
                let driver = axes.get_mut(axis);
                if driver.remaining_steps() == 0 {
                    return self.fail(HomingFailReason::LimitNotFound(axis), axes);
                }
                driver.advance();
                HomingTickResult::InProgress
            }

            HomingStage::BackingOff(axis) => {
                if axes.get(axis).remaining_steps() != 0 {
                    if self.expired(now) {
                        return self.fail(HomingFailReason::Timeout(axis), axes);
                    }
                    axes.get_mut(axis).advance();
                    return HomingTickResult::InProgress;
                }
                if config.homing.backoff > 0.0 && limit_pressed(axis, config, io) {
                    return self.fail(HomingFailReason::LimitStuck(axis), axes);
                }

                axes.get_mut(axis).set_current_position(0);
                debug!(axis = axis.name(), "axis referenced");
                match axis {
                    Axis::X => {
                        self.begin_seek(Axis::Y, now, config, axes);
                        HomingTickResult::InProgress
                    }
                    Axis::Y => {
                        self.stage = HomingStage::Finished;
                        self.deadline = None;
                        info!("homing complete");
                        HomingTickResult::Success
                    }
                }
            }
        }
    }

    /// Halt both axes and return to idle (STOP/RESET).
    pub fn abort<A: AxisDriver>(&mut self, axes: &mut Axes<A>) {
        axes.stop();
        if self.is_active() {
            debug!(stage = ?self.stage, "homing aborted");
        }
        self.reset();
    }

    /// Forget the last outcome.
    pub fn reset(&mut self) {
        self.stage = HomingStage::Idle;
        self.deadline = None;
        self.failure = None;
    }

    fn begin_seek<A: AxisDriver>(
        &mut self,
        axis: Axis,
        now: Instant,
        config: &MachineConfig,
        axes: &mut Axes<A>,
    ) {
        let axis_cfg = axis_config(config, axis);
        let distance = axis_cfg.to_steps(axis_cfg.max_travel * SEEK_TRAVEL_FACTOR);
        let profile = axis_cfg.profile(config.homing.speed, axis_cfg.work_acceleration);
        let driver = axes.get_mut(axis);
        driver.set_motion_profile(profile);
        driver.move_relative(config.homing.direction.sign() * distance);
        self.stage = HomingStage::MovingToLimit(axis);
        self.deadline = phase_deadline(now, distance, profile, config.homing.timeout_ms);
        debug!(axis = axis.name(), distance, "seeking limit");
    }

    fn begin_backoff<A: AxisDriver>(
        &mut self,
        axis: Axis,
        now: Instant,
        config: &MachineConfig,
        axes: &mut Axes<A>,
    ) {
        let axis_cfg = axis_config(config, axis);
        let distance = axis_cfg.to_steps(config.homing.backoff);
        let profile = axis_cfg.profile(config.homing.slow_speed, axis_cfg.work_acceleration);
        let driver = axes.get_mut(axis);
        driver.stop();
        driver.set_motion_profile(profile);
        driver.move_relative(-config.homing.direction.sign() * distance);
        self.stage = HomingStage::BackingOff(axis);
        self.deadline = phase_deadline(now, distance, profile, config.homing.timeout_ms);
        debug!(axis = axis.name(), distance, "limit reached, backing off");
    }

    fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    fn fail<A: AxisDriver>(&mut self, reason: HomingFailReason, axes: &mut Axes<A>) -> HomingTickResult {
        axes.stop();
        self.stage = HomingStage::Error;
        self.deadline = None;
        self.failure = Some(reason);
        warn!(reason = %reason.describe(), "homing failed");
        HomingTickResult::Failed { reason }
    }
}

/// Deadline of a phase moving `distance` steps: nominal duration at the
/// profile speed plus `allowance_ms`. `None` if it does not fit an `Instant`.
fn phase_deadline(
    now: Instant,
    distance: i64,
    profile: MotionProfile,
    allowance_ms: u64,
) -> Option<Instant> {
    let nominal = if profile.max_speed > 0.0 {
        Duration::try_from_secs_f64(distance.unsigned_abs() as f64 / profile.max_speed)
            .unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    };
    let allowed = nominal.saturating_add(Duration::from_millis(allowance_ms));
    now.checked_add(allowed)
}

fn axis_config(config: &MachineConfig, axis: Axis) -> &AxisConfig {
    match axis {
        Axis::X => &config.x,
        Axis::Y => &config.y,
    }
}

fn limit_pressed<I: MachineIo>(axis: Axis, config: &MachineConfig, io: &I) -> bool {
    config
        .safety
        .limit_switch_type
        .is_triggered(io.limit_level(axis))
}
