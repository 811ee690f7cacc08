//! G-code job execution.
//!
//! - [`gcode`]: line parser and pure move planner
//! - [`engine`]: job stage machine, one bounded unit of work per tick

pub mod engine;
pub mod gcode;

pub use engine::{JobEngine, JobTick};
pub use gcode::{Block, MoveWord, PlannedMove, parse_line, plan_move};
