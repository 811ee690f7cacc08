//! Operator command types.
//!
//! Defines `Command`, `CommandPriority`, `CommandEnvelope`, `JogRequest`
//! and `Accessory`. Commands travel from the Supervisory Task to the Motion
//! Task by value; none of them borrow or allocate.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Priority class used by the command arbiter.
///
/// Ordered so that `Emergency > High > Normal > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(u8)]
pub enum CommandPriority {
    /// Configuration housekeeping.
    Low = 0,
    /// Regular operator intent.
    #[default]
    Normal = 1,
    /// Stop/pause of an active job.
    High = 2,
    /// Emergency stop and reset; executed on the tick they are observed.
    Emergency = 3,
}

/// Switchable machine accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accessory {
    /// Cutting wire heater.
    HotWire,
    /// Fume extraction fan.
    Fan,
}

/// Speed selection for a jog move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JogSpeed {
    /// Axis rapid feed rate and acceleration.
    Rapid,
    /// Axis work feed rate and acceleration.
    #[default]
    Work,
    /// Explicit feed rate [mm/min] with work acceleration.
    Explicit(f64),
}

/// One relative jog move.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JogRequest {
    /// Signed X distance [mm].
    pub x_mm: f64,
    /// Signed Y distance [mm].
    pub y_mm: f64,
    /// Speed selection.
    pub speed: JogSpeed,
}

impl JogRequest {
    pub const fn new(x_mm: f64, y_mm: f64, speed: JogSpeed) -> Self {
        Self { x_mm, y_mm, speed }
    }

    /// True when neither axis would move.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x_mm == 0.0 && self.y_mm == 0.0
    }
}

/// Operator command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Start the selected project.
    Start,
    /// Stop the active job or motion.
    Stop,
    /// Toggle job pause.
    Pause,
    /// Run the homing sequence.
    Home,
    /// Clear faults, force outputs off, return to IDLE.
    Reset,
    /// Declare the current position as origin.
    Zero,
    /// Relative jog move.
    Jog(JogRequest),
    /// Switch an accessory output.
    SetAccessory { kind: Accessory, enabled: bool },
    /// Hot-wire power (0-255).
    SetWirePower(u8),
    /// Fan power (0-255).
    SetFanPower(u8),
    /// Halt everything, outputs off.
    EmergencyStop,
    /// Take a fresh configuration snapshot.
    ReloadConfig,
}

impl Command {
    /// Default priority class of this command.
    pub const fn priority(&self) -> CommandPriority {
        match self {
            Self::EmergencyStop | Self::Reset => CommandPriority::Emergency,
            Self::Stop | Self::Pause => CommandPriority::High,
            Self::ReloadConfig => CommandPriority::Low,
            Self::Start
            | Self::Home
            | Self::Zero
            | Self::Jog(_)
            | Self::SetAccessory { .. }
            | Self::SetWirePower(_)
            | Self::SetFanPower(_) => CommandPriority::Normal,
        }
    }

    /// Short name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Pause => "PAUSE",
            Self::Home => "HOME",
            Self::Reset => "RESET",
            Self::Zero => "ZERO",
            Self::Jog(_) => "JOG",
            Self::SetAccessory { .. } => "SET_ACCESSORY",
            Self::SetWirePower(_) => "SET_WIRE_POWER",
            Self::SetFanPower(_) => "SET_FAN_POWER",
            Self::EmergencyStop => "EMERGENCY_STOP",
            Self::ReloadConfig => "RELOAD_CONFIG",
        }
    }
}

/// A command with its priority class and arrival timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandEnvelope {
    pub command: Command,
    pub priority: CommandPriority,
    /// Time the producer enqueued the command.
    pub issued_at: Instant,
}

impl CommandEnvelope {
    /// Wrap a command with its default priority.
    pub fn new(command: Command, issued_at: Instant) -> Self {
        Self {
            command,
            priority: command.priority(),
            issued_at,
        }
    }

    /// Override the priority class.
    pub fn with_priority(mut self, priority: CommandPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Age of the command at `now` (zero if `now` precedes arrival).
    #[inline]
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.issued_at)
    }
}
