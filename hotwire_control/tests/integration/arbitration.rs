//! Integration test: command arbitration, illegal commands, emergency stop.

use std::sync::atomic::Ordering;
use std::time::Duration;

use hotwire_common::machine::command::{Command, CommandPriority, JogRequest, JogSpeed};
use hotwire_common::machine::state::{FaultFlags, Mode};
use hotwire_control::hal::AxisDriver;

use super::harness::{Rig, base_config};

fn long_jog() -> Command {
    Command::Jog(JogRequest::new(50.0, 50.0, JogSpeed::Rapid))
}

#[test]
fn reset_is_served_before_earlier_stop() {
    let mut rig = Rig::new(base_config());
    rig.command(long_jog());
    assert_eq!(rig.mode(), Mode::Jog);

    // Within the poll interval: only an emergency-class command can go now.
    rig.send_with_priority(Command::Stop, CommandPriority::Normal);
    rig.send(Command::Reset);
    rig.tick();

    assert_eq!(rig.mode(), Mode::Idle);
    assert_eq!(rig.task.axes().x.remaining_steps(), 0);
    assert_eq!(rig.task.state().counters.discarded_commands, 0);

    // The STOP is released later and is illegal in IDLE.
    rig.advance(Duration::from_millis(100));
    rig.tick();
    assert_eq!(rig.mode(), Mode::Idle);
    assert_eq!(rig.task.state().counters.discarded_commands, 1);
}

#[test]
fn illegal_commands_leave_state_unchanged() {
    let mut rig = Rig::new(base_config());
    rig.tick();
    let before = rig.task.state().clone();

    for command in [Command::Stop, Command::Pause] {
        rig.command(command);
    }

    let after = rig.task.state();
    assert_eq!(after.mode(), before.mode());
    assert_eq!(after.x_mm, before.x_mm);
    assert_eq!(after.outputs, before.outputs);
    assert_eq!(after.paused, before.paused);
    assert_eq!(after.counters.discarded_commands, 2);
}

#[test]
fn one_command_per_poll_interval() {
    let mut rig = Rig::new(base_config());
    rig.send(Command::SetWirePower(10));
    rig.send(Command::SetFanPower(20));
    rig.tick();
    assert_eq!(rig.task.state().outputs.hot_wire_power, 10);
    assert_ne!(rig.task.state().outputs.fan_power, 20);

    // 10 ms ticks: the second command waits for the 50 ms interval.
    rig.ticks(5);
    assert_eq!(rig.task.state().outputs.fan_power, 20);
}

#[test]
fn stale_commands_are_dropped() {
    let mut rig = Rig::new(base_config());
    rig.send(long_jog());
    rig.advance(Duration::from_secs(3));
    rig.tick();

    assert_eq!(rig.mode(), Mode::Idle);
    assert_eq!(rig.task.state().counters.stale_commands, 1);
    let status = rig.statuses().pop().unwrap();
    assert_eq!(status.stale_commands, 1);
}

#[test]
fn emergency_stop_halts_and_latches() {
    let mut rig = Rig::new(base_config());
    rig.command(Command::SetAccessory {
        kind: hotwire_common::machine::command::Accessory::HotWire,
        enabled: true,
    });
    assert!(rig.task.io().outputs().hot_wire);
    rig.command(long_jog());
    rig.ticks(10);

    rig.send(Command::EmergencyStop);
    rig.tick();
    assert_eq!(rig.mode(), Mode::Stopped);
    assert!(rig.task.axes().arrived());
    assert!(!rig.task.io().outputs().hot_wire);
    assert!(rig.task.state().faults.contains(FaultFlags::EMERGENCY_STOP));

    // Only RESET leaves STOPPED.
    rig.command(long_jog());
    assert_eq!(rig.mode(), Mode::Stopped);
    rig.send(Command::Reset);
    rig.tick();
    assert_eq!(rig.mode(), Mode::Idle);
    assert!(rig.task.state().faults.is_empty());
}

#[test]
fn estop_input_overrides_reset_while_held() {
    let mut rig = Rig::new(base_config());
    rig.estop.store(true, Ordering::Relaxed);
    rig.tick();
    assert_eq!(rig.mode(), Mode::Stopped);

    rig.send(Command::Reset);
    rig.tick();
    assert_eq!(rig.mode(), Mode::Stopped);

    rig.estop.store(false, Ordering::Relaxed);
    rig.send(Command::Reset);
    rig.tick();
    assert_eq!(rig.mode(), Mode::Idle);
}

#[test]
fn estop_input_ignored_when_deactivated() {
    let mut config = base_config();
    config.safety.deactivate_estop = true;
    let mut rig = Rig::new(config);
    rig.estop.store(true, Ordering::Relaxed);
    rig.ticks(3);
    assert_eq!(rig.mode(), Mode::Idle);
}

#[test]
fn full_command_channel_counts_drops() {
    let mut rig = Rig::new(base_config());
    let accepted = (0..20).filter(|_| rig.send(Command::Zero)).count();
    assert_eq!(accepted, 15);
    assert_eq!(rig.cmd_tx.dropped(), 5);
}

#[test]
fn stop_during_jog_returns_to_idle() {
    let mut rig = Rig::new(base_config());
    rig.command(long_jog());
    rig.ticks(20);
    rig.command(Command::Stop);
    assert_eq!(rig.mode(), Mode::Idle);
    let x = rig.task.state().x_mm;
    assert!(x > 0.0 && x < 50.0);
    assert_eq!(rig.task.axes().x.remaining_steps(), 0);
}

#[test]
fn jog_completes_and_updates_position() {
    let mut rig = Rig::new(base_config());
    rig.command(Command::Jog(JogRequest::new(2.0, -1.0, JogSpeed::Work)));
    rig.run_until(1000, |r| r.mode() == Mode::Idle);
    assert_eq!(rig.task.state().x_mm, 2.0);
    assert_eq!(rig.task.state().y_mm, -1.0);
}

#[test]
fn estop_behind_command_flood_acts_next_tick() {
    let mut rig = Rig::new(base_config());
    for _ in 0..15 {
        assert!(rig.send(Command::Zero));
    }
    rig.tick();
    for _ in 0..15 {
        assert!(rig.send(Command::Zero));
    }
    rig.tick();

    assert!(rig.send(Command::EmergencyStop));
    rig.tick();

    assert_eq!(rig.mode(), Mode::Stopped);
    assert!(rig.task.state().faults.contains(FaultFlags::EMERGENCY_STOP));
    // One ZERO executed; 13 lost to the full pending list, one evicted by the stop.
    assert_eq!(rig.task.state().counters.discarded_commands, 14);
}

#[test]
fn estop_sent_into_full_channel_is_not_lost() {
    let mut rig = Rig::new(base_config());
    rig.command(long_jog());
    while rig.send(Command::Zero) {}
    let dropped = rig.cmd_tx.dropped();

    assert!(rig.send(Command::EmergencyStop));
    assert_eq!(rig.cmd_tx.dropped(), dropped);
    rig.tick();

    assert_eq!(rig.mode(), Mode::Stopped);
    assert!(rig.task.axes().arrived());
}
