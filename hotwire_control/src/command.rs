//! Command processing: arbitration, jog control, homing control.

pub mod arbitration;
pub mod homing;
pub mod jog;
