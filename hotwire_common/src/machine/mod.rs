//! Machine types shared by the Motion and Supervisory tasks.
//!
//! Organized by domain: operator commands, machine/job state enums and the
//! status snapshot, and the machine configuration consumed at job start.

pub mod command;
pub mod config;
pub mod state;
