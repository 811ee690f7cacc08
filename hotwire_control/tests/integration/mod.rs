mod arbitration;
mod harness;
mod homing;
mod job_lifecycle;
mod reload;
