//! Integration test: limit-seek homing through the Motion Task.

use std::sync::atomic::Ordering;

use hotwire_common::machine::command::Command;
use hotwire_common::machine::state::{FaultFlags, HomingStage, Mode};
use hotwire_control::hal::AxisDriver;

use super::harness::{Rig, base_config};

fn switched_rig() -> Rig {
    let mut config = base_config();
    config.safety.deactivate_limit_switches = false;
    Rig::with_switches(config, 300, 500)
}

#[test]
fn homes_both_axes_against_switches() {
    let mut rig = switched_rig();
    rig.command(Command::Home);
    assert_eq!(rig.mode(), Mode::Homing);
    assert!(!rig.task.state().homed);

    rig.run_until(5_000, |r| r.mode() != Mode::Homing);

    assert_eq!(rig.mode(), Mode::Idle);
    assert_eq!(rig.task.homing_stage(), HomingStage::Finished);
    let state = rig.task.state();
    assert!(state.homed);
    assert_eq!(state.x_mm, 0.0);
    assert_eq!(state.y_mm, 0.0);
    assert!(state.faults.is_empty());

    // Logical zero sits one back-off (2 mm = 20 steps) off the switch.
    let axes = rig.task.axes();
    assert_eq!(axes.x.current_position(), 0);
    assert_eq!(axes.x.readout().load(Ordering::Relaxed), 20);
    assert_eq!(axes.y.readout().load(Ordering::Relaxed), 20);
}

#[test]
fn missing_switch_times_out_into_error() {
    let mut config = base_config();
    config.safety.deactivate_limit_switches = false;
    // 150 mm at 60 m/min: 150 ms nominal seek plus 100 ms allowance.
    config.homing.speed = 60_000.0;
    config.homing.timeout_ms = 100;
    let mut rig = Rig::new(config);

    rig.command(Command::Home);
    rig.run_until(100, |r| r.mode() != Mode::Homing);

    assert_eq!(rig.mode(), Mode::Error);
    assert_eq!(rig.task.homing_stage(), HomingStage::Error);
    let state = rig.task.state();
    assert!(state.faults.contains(FaultFlags::HOMING_TIMEOUT));
    assert!(!state.homed);
    assert!(state.last_error.as_str().contains("X axis"));
    assert_eq!(rig.task.axes().x.remaining_steps(), 0);

    // HOME is refused until RESET.
    rig.command(Command::Home);
    assert_eq!(rig.mode(), Mode::Error);
    rig.command(Command::Reset);
    assert_eq!(rig.mode(), Mode::Idle);
    assert!(rig.task.state().faults.is_empty());
    assert_eq!(rig.task.homing_stage(), HomingStage::Idle);
}

#[test]
fn stop_abandons_homing() {
    let mut rig = switched_rig();
    rig.command(Command::Home);
    rig.ticks(10);
    assert!(matches!(rig.task.homing_stage(), HomingStage::MovingToLimit(_)));

    rig.command(Command::Stop);
    assert_eq!(rig.mode(), Mode::Idle);
    assert_eq!(rig.task.homing_stage(), HomingStage::Idle);
    assert!(!rig.task.state().homed);
    assert_eq!(rig.task.axes().x.remaining_steps(), 0);
    assert!(rig.task.state().x_mm > 0.0);
}

#[test]
fn deactivated_switches_zero_in_place() {
    let mut rig = Rig::with_switches(base_config(), 300, 500);
    rig.command(Command::Home);

    assert_eq!(rig.mode(), Mode::Idle);
    assert!(rig.task.state().homed);
    assert_eq!(rig.task.state().x_mm, 0.0);
    // No motion: the carriage is still where it was.
    assert_eq!(rig.task.axes().x.readout().load(Ordering::Relaxed), 300);
    assert_eq!(rig.task.axes().y.readout().load(Ordering::Relaxed), 500);
}
