//! Hardware contracts and their simulated implementations.

pub mod driver;
pub mod simulation;

pub use driver::{AxisDriver, Axes, MachineIo, OutputLatch, Outputs};
pub use simulation::{Pacing, SimulatedIo, SimulatedStepper};
