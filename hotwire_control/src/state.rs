//! Machine state owned by the Motion Task.
//!
//! - [`machine`]: Mode State Machine (IDLE/RUNNING/JOG/HOMING/STOPPED/ERROR)
//! - [`runtime`]: `MachineState`, the mutable runtime record published as
//!   status snapshots

pub mod machine;
pub mod runtime;
