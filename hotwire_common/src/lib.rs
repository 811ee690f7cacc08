//! Hot-wire Common Library
//!
//! Shared constants, configuration loading and machine types used by both
//! the Motion Task and the Supervisory Task of the hot-wire cutter.
//!
//! # Module Structure
//!
//! - [`consts`] - Channel capacities, default intervals and limits
//! - [`config`] - Generic TOML configuration loading
//! - [`machine`] - Commands, machine state, status snapshots, machine config
//! - [`prelude`] - Common re-exports for convenience

pub mod config;
pub mod consts;
pub mod machine;
pub mod prelude;
