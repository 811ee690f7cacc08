//! Axis driver and machine I/O contracts.
//!
//! The core never generates step pulses itself: it hands a motion profile
//! and a target to an [`AxisDriver`] and then calls [`AxisDriver::advance`]
//! once per tick until [`AxisDriver::remaining_steps`] reaches zero.
//!
//! # Timing Contracts
//!
//! | Operation   | Max Duration | Blocking |
//! |-------------|--------------|----------|
//! | `advance()` | one step     | never    |
//! | `stop()`    | immediate    | never    |
//! | I/O writes  | immediate    | never    |

use hotwire_common::machine::config::MotionProfile;
use hotwire_common::machine::state::Axis;

/// Per-axis stepper capability.
pub trait AxisDriver: Send {
    /// Max speed [steps/s] and acceleration [steps/s²] for subsequent moves.
    fn set_motion_profile(&mut self, profile: MotionProfile);

    /// Move to an absolute step position.
    fn move_absolute(&mut self, target_steps: i64);

    /// Move relative to the current position.
    fn move_relative(&mut self, delta_steps: i64);

    /// Perform at most one step. Returns `true` if a step was taken.
    fn advance(&mut self) -> bool;

    /// Signed steps left to the target.
    fn remaining_steps(&self) -> i64;

    /// Current step position.
    fn current_position(&self) -> i64;

    /// Redefine the current position; cancels any pending move.
    fn set_current_position(&mut self, steps: i64);

    /// Halt immediately; the target becomes the current position.
    fn stop(&mut self);
}

/// Digital outputs, emergency-stop and limit inputs.
pub trait MachineIo: Send {
    fn set_hot_wire(&mut self, on: bool);
    fn set_fan(&mut self, on: bool);
    fn set_hot_wire_power(&mut self, power: u8);
    fn set_fan_power(&mut self, power: u8);

    /// Raw electrical level of the axis limit input (before polarity).
    fn limit_level(&self, axis: Axis) -> bool;

    /// True while the physical emergency-stop input is asserted.
    fn estop_asserted(&self) -> bool;
}

// ─── Axis Pair ──────────────────────────────────────────────────────

/// The X and Y drivers, owned by the Motion Task.
#[derive(Debug)]
pub struct Axes<A> {
    pub x: A,
    pub y: A,
}

impl<A: AxisDriver> Axes<A> {
    pub fn new(x: A, y: A) -> Self {
        Self { x, y }
    }

    pub fn get(&self, axis: Axis) -> &A {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
        }
    }

    pub fn get_mut(&mut self, axis: Axis) -> &mut A {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
        }
    }

    /// One step on each axis.
    #[inline]
    pub fn advance(&mut self) {
        self.x.advance();
        self.y.advance();
    }

    /// Both axes report zero remaining distance.
    #[inline]
    pub fn arrived(&self) -> bool {
        self.x.remaining_steps() == 0 && self.y.remaining_steps() == 0
    }

    /// Halt both axes.
    pub fn stop(&mut self) {
        self.x.stop();
        self.y.stop();
    }

    /// Declare the current position as origin on both axes.
    pub fn zero(&mut self) {
        self.x.set_current_position(0);
        self.y.set_current_position(0);
    }
}

// ─── Outputs ────────────────────────────────────────────────────────

/// Desired state of the switchable outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outputs {
    pub hot_wire: bool,
    pub hot_wire_power: u8,
    pub fan: bool,
    pub fan_power: u8,
}

impl Outputs {
    /// Everything off, powers at the given defaults.
    pub const fn off(hot_wire_power: u8, fan_power: u8) -> Self {
        Self {
            hot_wire: false,
            hot_wire_power,
            fan: false,
            fan_power,
        }
    }

    /// Switch both outputs off, keeping the power settings.
    #[inline]
    pub fn force_off(&mut self) {
        self.hot_wire = false;
        self.fan = false;
    }
}

/// Writes outputs to the I/O layer only when they change.
#[derive(Debug, Default)]
pub struct OutputLatch {
    applied: Option<Outputs>,
}

impl OutputLatch {
    pub const fn new() -> Self {
        Self { applied: None }
    }

    /// Apply `desired`; returns `true` if anything was written.
    pub fn apply<I: MachineIo>(&mut self, desired: Outputs, io: &mut I) -> bool {
        let prev = self.applied;
        if prev == Some(desired) {
            return false;
        }
        let changed = |f: fn(&Outputs) -> u8| prev.is_none_or(|p| f(&p) != f(&desired));

        if changed(|o| o.hot_wire_power) {
            io.set_hot_wire_power(desired.hot_wire_power);
        }
        if changed(|o| o.fan_power) {
            io.set_fan_power(desired.fan_power);
        }
        if changed(|o| o.hot_wire as u8) {
            io.set_hot_wire(desired.hot_wire);
        }
        if changed(|o| o.fan as u8) {
            io.set_fan(desired.fan);
        }
        self.applied = Some(desired);
        true
    }

    /// Last outputs written, if any.
    pub fn applied(&self) -> Option<Outputs> {
        self.applied
    }
}
