//! Mode State Machine.
//!
//! Two inputs drive it:
//! - operator commands, filtered by [`ModeMachine::accepts`] (anything not
//!   legal for the current mode is discarded without effect),
//! - [`ModeEvent`]s raised by the Motion Task once a command has been
//!   carried out or a controller reports a terminal condition.
//!
//! | Mode    | Accepted commands                                        |
//! |---------|----------------------------------------------------------|
//! | IDLE    | START, JOG, accessories/power, HOME, ZERO, RESET, RELOAD |
//! | RUNNING | STOP, PAUSE, RESET                                       |
//! | JOG     | STOP, RESET                                              |
//! | HOMING  | STOP, RESET                                              |
//! | STOPPED | RESET                                                    |
//! | ERROR   | RESET                                                    |
//!
//! EMERGENCY_STOP is accepted in every mode.

use hotwire_common::machine::command::Command;
use hotwire_common::machine::state::Mode;

/// Result of a mode transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded, new mode.
    Ok(Mode),
    /// Transition rejected, reason.
    Rejected(&'static str),
}

/// Event that can change the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEvent {
    /// START succeeded (job file open).
    JobStarted,
    /// JOG issued a motion request.
    JogStarted,
    /// HOME started the homing sequence.
    HomingStarted,
    /// Job engine reached end of file.
    JobFinished,
    /// Job engine acknowledged a stop request (file closed, axes halted).
    JobStopped,
    /// Line interpretation or storage failure mid-job.
    JobFailed,
    /// Jog or homing motion completed.
    MotionComplete,
    /// STOP/RESET during jog or homing.
    MotionAborted,
    /// Limit not found or still asserted during homing.
    HomingFailed,
    /// Emergency stop (command or input).
    EmergencyStop,
    /// RESET serviced.
    Reset,
}

/// Holder of the current mode.
#[derive(Debug, Clone, Default)]
pub struct ModeMachine {
    mode: Mode,
}

impl ModeMachine {
    /// Start in IDLE.
    pub const fn new() -> Self {
        Self { mode: Mode::Idle }
    }

    #[inline]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether `command` is legal in the current mode.
    pub const fn accepts(&self, command: &Command) -> bool {
        use Command::*;

        match (self.mode, command) {
            (_, EmergencyStop) => true,
            (_, Reset) => true,

            (
                Mode::Idle,
                Start
                | Home
                | Zero
                | Jog(_)
                | SetAccessory { .. }
                | SetWirePower(_)
                | SetFanPower(_)
                | ReloadConfig,
            ) => true,

            (Mode::Running, Stop | Pause) => true,
            (Mode::Jog | Mode::Homing, Stop) => true,

            _ => false,
        }
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: ModeEvent) -> TransitionResult {
        use Mode::*;
        use ModeEvent::*;

        let next = match (self.mode, event) {
            (Idle, JobStarted) => Running,
            (Idle, JogStarted) => Jog,
            (Idle, HomingStarted) => Homing,

            (Running, JobFinished) => Idle,
            (Running, JobStopped) => Stopped,
            (Running, JobFailed) => Error,

            (Jog | Homing, MotionComplete) => Idle,
            (Jog | Homing, MotionAborted) => Idle,
            (Homing, HomingFailed) => Error,

            // A latched mode stays latched; outputs are re-forced by the caller.
            (Stopped | Error, EmergencyStop) => self.mode,
            (_, EmergencyStop) => Stopped,

            (_, Reset) => Idle,

            _ => return TransitionResult::Rejected(invalid_transition_reason(self.mode, event)),
        };

        self.mode = next;
        TransitionResult::Ok(next)
    }
}

fn invalid_transition_reason(mode: Mode, event: ModeEvent) -> &'static str {
    match (mode, event) {
        (Mode::Idle, _) => "event not valid in IDLE",
        (Mode::Running, _) => "event not valid in RUNNING",
        (Mode::Jog, _) => "event not valid in JOG",
        (Mode::Homing, _) => "event not valid in HOMING",
        (Mode::Stopped, _) => "STOPPED requires RESET",
        (Mode::Error, _) => "ERROR requires RESET",
    }
}
