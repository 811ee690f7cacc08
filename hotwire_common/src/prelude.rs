//! Common re-exports.
//!
//! ```rust
//! use hotwire_common::prelude::*;
//! ```

pub use crate::config::{ConfigError, ConfigLoader, LogLevel};
pub use crate::consts::*;
pub use crate::machine::command::{
    Accessory, Command, CommandEnvelope, CommandPriority, JogRequest, JogSpeed,
};
pub use crate::machine::config::{
    AxisConfig, HomingConfig, HomingDirection, JobConfig, LimitSwitchType, MachineConfig,
    MotionProfile, SafetyConfig, TimingConfig,
};
pub use crate::machine::state::{
    Axis, ErrorMessage, FaultFlags, HomingStage, JobStage, Mode, Positioning, ProjectName,
    StatusSnapshot, bounded,
};
