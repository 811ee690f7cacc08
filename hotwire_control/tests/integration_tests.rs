//! Integration tests for the hot-wire controller.
//!
//! These tests drive the full Motion Task (arbiter, mode machine, job
//! engine, jog/homing controllers, status publisher) against simulated
//! axes and a temporary projects directory.

mod integration;
