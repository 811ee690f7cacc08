//! Jog controller.
//!
//! A JOG command in IDLE issues one relative move per axis; afterwards the
//! controller advances both drivers by one step per tick until both report
//! zero remaining distance. STOP/RESET halts both axes immediately.

use hotwire_common::machine::command::{JogRequest, JogSpeed};
use hotwire_common::machine::config::{AxisConfig, MachineConfig, MotionProfile};
use tracing::debug;

use crate::hal::{AxisDriver, Axes};

/// Outcome of one jog tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogTick {
    /// Still moving.
    Moving,
    /// Both axes arrived.
    Arrived,
}

/// Profile for one axis of a jog move.
pub fn jog_profile(axis: &AxisConfig, speed: JogSpeed) -> MotionProfile {
    match speed {
        JogSpeed::Rapid => axis.rapid_profile(),
        JogSpeed::Work => axis.work_profile(),
        JogSpeed::Explicit(feed) if feed > 0.0 => axis.profile(feed, axis.work_acceleration),
        JogSpeed::Explicit(_) => axis.work_profile(),
    }
}

/// Relative jog motion controller.
#[derive(Debug, Default)]
pub struct JogController {
    active: bool,
}

impl JogController {
    pub const fn new() -> Self {
        Self { active: false }
    }

    #[inline]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Issue the relative move. Returns `false` (nothing issued) when the
    /// request rounds to zero steps on both axes.
    pub fn start<A: AxisDriver>(
        &mut self,
        request: &JogRequest,
        config: &MachineConfig,
        axes: &mut Axes<A>,
    ) -> bool {
        let dx = config.x.to_steps(request.x_mm);
        let dy = config.y.to_steps(request.y_mm);
        if dx == 0 && dy == 0 {
            return false;
        }

        axes.x.set_motion_profile(jog_profile(&config.x, request.speed));
        axes.y.set_motion_profile(jog_profile(&config.y, request.speed));
        axes.x.move_relative(dx);
        axes.y.move_relative(dy);
        self.active = true;
        debug!(dx, dy, speed = ?request.speed, "jog started");
        true
    }

    /// One bounded step of the jog.
    pub fn tick<A: AxisDriver>(&mut self, axes: &mut Axes<A>) -> JogTick {
        if !self.active {
            return JogTick::Arrived;
        }
        axes.advance();
        if axes.arrived() {
            self.active = false;
            debug!("jog arrived");
            JogTick::Arrived
        } else {
            JogTick::Moving
        }
    }

    /// Halt both axes immediately.
    pub fn abort<A: AxisDriver>(&mut self, axes: &mut Axes<A>) {
        axes.stop();
        if self.active {
            debug!("jog aborted");
        }
        self.active = false;
    }
}
