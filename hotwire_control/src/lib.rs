//! # Hot-wire Control Library
//!
//! Non-blocking job execution engine and real-time coordination layer for a
//! two-axis hot-wire cutter. Two tasks cooperate:
//!
//! - **Motion Task** ([`cycle::MotionTask`]) owns the mode state machine, the
//!   command arbiter, the jog/homing controllers, the G-code job engine, the
//!   axis drivers and the physical outputs.
//! - **Supervisory Task** ([`supervisor`]) turns operator input into commands
//!   and consumes status snapshots.
//!
//! They talk only through two bounded SPSC channels ([`channel`]) and share
//! the storage device through the [`storage::StorageGate`].
//!
//! ## Bounded Ticks
//!
//! Every Motion Task tick performs at most one unit of work per active
//! controller and never waits: storage is acquired with a zero timeout, and
//! every "wait for completion" is a poll repeated on the next tick.

pub mod channel;
pub mod command;
pub mod config;
pub mod cycle;
pub mod error;
pub mod hal;
pub mod job;
pub mod state;
pub mod status;
pub mod storage;
pub mod supervisor;
