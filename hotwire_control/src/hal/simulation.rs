//! Simulated stepper axes and machine I/O.
//!
//! `SimulatedStepper` runs an independent trapezoidal profile per axis: the
//! speed after each step follows `v² = v₀² ± 2a` and deceleration starts
//! once the stopping distance `v²/2a` covers the remaining steps.
//!
//! Two pacing modes:
//! - **FreeRunning**: every `advance()` takes one step (tests).
//! - **WallClock**: a step is taken only once `1/v` has elapsed since the
//!   previous one (the binary).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use hotwire_common::machine::config::{HomingDirection, LimitSwitchType, MotionProfile};
use hotwire_common::machine::state::Axis;
use tracing::trace;

use super::driver::{AxisDriver, MachineIo, Outputs};

/// Step pacing of a simulated axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    FreeRunning,
    WallClock,
}

// ─── Stepper ────────────────────────────────────────────────────────

/// Trapezoidal-profile stepper simulator.
#[derive(Debug)]
pub struct SimulatedStepper {
    position: i64,
    target: i64,
    profile: MotionProfile,
    /// Current speed magnitude [steps/s].
    speed: f64,
    pacing: Pacing,
    last_step: Option<Instant>,
    /// Physical position minus logical position.
    origin: i64,
    /// Physical position mirror readable from other threads (limit switch model).
    readout: Arc<AtomicI64>,
}

impl SimulatedStepper {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            position: 0,
            target: 0,
            profile: MotionProfile::default(),
            speed: 0.0,
            pacing,
            last_step: None,
            origin: 0,
            readout: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Place the carriage at a physical step position (logical = physical).
    pub fn placed_at(mut self, steps: i64) -> Self {
        self.position = steps;
        self.target = steps;
        self.origin = 0;
        self.readout.store(steps, Ordering::Relaxed);
        self
    }

    /// One step per `advance()`.
    pub fn free_running() -> Self {
        Self::new(Pacing::FreeRunning)
    }

    /// Steps paced by wall-clock time.
    pub fn paced() -> Self {
        Self::new(Pacing::WallClock)
    }

    /// Shared handle to the live physical step position.
    pub fn readout(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.readout)
    }

    /// Current speed [steps/s].
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Active motion profile.
    pub fn profile(&self) -> MotionProfile {
        self.profile
    }

    /// Target step position.
    pub fn target(&self) -> i64 {
        self.target
    }

    fn set_position(&mut self, steps: i64) {
        self.position = steps;
        self.readout.store(steps + self.origin, Ordering::Relaxed);
    }

    /// Speed after the step just taken, `remaining` steps still to go.
    fn next_speed(&self, remaining: u64) -> f64 {
        let max = self.profile.max_speed;
        let accel = self.profile.acceleration;
        if accel <= 0.0 {
            return max;
        }
        let floor = (2.0 * accel).sqrt().min(max);
        let v2 = self.speed * self.speed;
        let stopping_steps = v2 / (2.0 * accel);
        if stopping_steps >= remaining as f64 {
            (v2 - 2.0 * accel).max(floor * floor).sqrt()
        } else {
            (v2 + 2.0 * accel).min(max * max).sqrt()
        }
    }

    fn step_due(&self, now: Instant) -> bool {
        match (self.pacing, self.last_step) {
            (Pacing::FreeRunning, _) | (Pacing::WallClock, None) => true,
            (Pacing::WallClock, Some(last)) => {
                self.speed <= 0.0
                    || now.saturating_duration_since(last)
                        >= Duration::from_secs_f64(1.0 / self.speed)
            }
        }
    }
}

impl AxisDriver for SimulatedStepper {
    fn set_motion_profile(&mut self, profile: MotionProfile) {
        self.profile = profile;
        if self.speed > profile.max_speed {
            self.speed = profile.max_speed;
        }
    }

    fn move_absolute(&mut self, target_steps: i64) {
        self.target = target_steps;
    }

    fn move_relative(&mut self, delta_steps: i64) {
        self.target = self.position + delta_steps;
    }

    fn advance(&mut self) -> bool {
        let remaining = (self.target - self.position).unsigned_abs();
        if remaining == 0 {
            self.speed = 0.0;
            self.last_step = None;
            return false;
        }
        if self.profile.max_speed <= 0.0 {
            return false;
        }

        let now = Instant::now();
        if !self.step_due(now) {
            return false;
        }

        let dir = (self.target - self.position).signum();
        self.set_position(self.position + dir);
        self.speed = self.next_speed(remaining - 1);
        self.last_step = Some(now);
        trace!(position = self.position, speed = self.speed, "step");
        true
    }

    fn remaining_steps(&self) -> i64 {
        self.target - self.position
    }

    fn current_position(&self) -> i64 {
        self.position
    }

    fn set_current_position(&mut self, steps: i64) {
        // Re-referencing moves the logical frame, not the carriage.
        self.origin += self.position - steps;
        self.set_position(steps);
        self.target = steps;
        self.speed = 0.0;
        self.last_step = None;
    }

    fn stop(&mut self) {
        self.target = self.position;
        self.speed = 0.0;
        self.last_step = None;
    }
}

// ─── Machine I/O ────────────────────────────────────────────────────

#[derive(Debug)]
struct LimitSwitch {
    readout: Arc<AtomicI64>,
    trigger_at: i64,
    side: HomingDirection,
}

impl LimitSwitch {
    fn pressed(&self) -> bool {
        let pos = self.readout.load(Ordering::Relaxed);
        match self.side {
            HomingDirection::Negative => pos <= self.trigger_at,
            HomingDirection::Positive => pos >= self.trigger_at,
        }
    }
}

/// Simulated outputs, limit switches and emergency-stop input.
#[derive(Debug)]
pub struct SimulatedIo {
    polarity: LimitSwitchType,
    limits: [Option<LimitSwitch>; 2],
    estop: Arc<AtomicBool>,
    outputs: Outputs,
    writes: u32,
}

impl SimulatedIo {
    pub fn new(polarity: LimitSwitchType) -> Self {
        Self {
            polarity,
            limits: [None, None],
            estop: Arc::new(AtomicBool::new(false)),
            outputs: Outputs::off(0, 0),
            writes: 0,
        }
    }

    /// Place a limit switch at `trigger_at` steps on the `side` end of `axis`.
    pub fn with_limit(
        mut self,
        axis: Axis,
        readout: Arc<AtomicI64>,
        trigger_at: i64,
        side: HomingDirection,
    ) -> Self {
        self.limits[axis_index(axis)] = Some(LimitSwitch {
            readout,
            trigger_at,
            side,
        });
        self
    }

    /// Handle that asserts the emergency-stop input when set.
    pub fn estop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.estop)
    }

    /// Outputs as last written.
    pub fn outputs(&self) -> Outputs {
        self.outputs
    }

    /// Number of output writes performed.
    pub fn write_count(&self) -> u32 {
        self.writes
    }
}

const fn axis_index(axis: Axis) -> usize {
    match axis {
        Axis::X => 0,
        Axis::Y => 1,
    }
}

impl MachineIo for SimulatedIo {
    fn set_hot_wire(&mut self, on: bool) {
        self.outputs.hot_wire = on;
        self.writes += 1;
    }

    fn set_fan(&mut self, on: bool) {
        self.outputs.fan = on;
        self.writes += 1;
    }

    fn set_hot_wire_power(&mut self, power: u8) {
        self.outputs.hot_wire_power = power;
        self.writes += 1;
    }

    fn set_fan_power(&mut self, power: u8) {
        self.outputs.fan_power = power;
        self.writes += 1;
    }

    fn limit_level(&self, axis: Axis) -> bool {
        let pressed = self.limits[axis_index(axis)]
            .as_ref()
            .is_some_and(LimitSwitch::pressed);
        match self.polarity {
            LimitSwitchType::NormallyOpen => pressed,
            LimitSwitchType::NormallyClosed => !pressed,
        }
    }

    fn estop_asserted(&self) -> bool {
        self.estop.load(Ordering::Relaxed)
    }
}
