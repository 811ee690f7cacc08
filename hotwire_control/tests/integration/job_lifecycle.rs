//! Integration test: START → stages → FINISHED / STOPPED / ERROR.

use std::sync::Arc;
use std::time::Duration;

use hotwire_common::machine::command::{Command, CommandPriority};
use hotwire_common::machine::state::{FaultFlags, JobStage, Mode};
use hotwire_control::hal::AxisDriver;

use super::harness::{Rig, base_config};

const SQUARE: &str = "G90\nG1 X2 Y0\nG1 X2 Y2\nG1 X0 Y2\nG1 X0 Y0\n";

fn running(gcode: &str) -> Rig {
    let mut rig = Rig::new(base_config());
    rig.project("cut.gcode", gcode);
    rig.command(Command::Start);
    assert_eq!(rig.mode(), Mode::Running);
    rig
}

#[test]
fn job_runs_to_completion() {
    let mut rig = running("G1 X3 Y1\nM3\nG1 X5\n");
    assert_eq!(rig.task.state().job.project.as_str(), "cut.gcode");

    let mut last = None;
    while rig.mode() == Mode::Running {
        rig.tick();
        last = rig.statuses().pop().or(last);
    }

    assert_eq!(rig.mode(), Mode::Idle);
    assert_eq!(rig.stage(), JobStage::Finished);
    let state = rig.task.state();
    assert_eq!(state.x_mm, 5.0);
    assert_eq!(state.y_mm, 1.0);
    assert_eq!(state.job.current_line, 3);
    assert_eq!(state.job.progress, 100.0);
    assert!(!state.outputs.hot_wire);
    assert!(!rig.task.job().file_open());

    let last = last.unwrap();
    assert_eq!(last.mode, Mode::Idle);
    assert_eq!(last.job_stage, JobStage::Finished);
    assert_eq!(last.progress, 100.0);
}

#[test]
fn offset_then_feed_limited_move() {
    let mut config = base_config();
    config.x.steps_per_mm = 80.0;
    config.x.work_feed_rate = 300.0;
    config.x.offset = 5.0;
    let mut rig = Rig::new(config);
    rig.project("cut.gcode", "G1 X10 Y0 F200\n");
    rig.command(Command::Start);

    rig.run_until(1_000, |r| r.stage() == JobStage::ExecutingMovement);
    assert_eq!(rig.task.state().x_mm, 5.0);
    assert_eq!(rig.task.axes().x.current_position(), 400);

    let x = &rig.task.axes().x;
    assert_eq!(x.target(), 800);
    assert!((x.profile().max_speed - 266.666).abs() < 0.01);

    rig.run_until(1_000, |r| r.mode() == Mode::Idle);
    assert_eq!(rig.task.state().x_mm, 10.0);
}

#[test]
fn stop_is_honored_in_every_stage() {
    let stages = [
        JobStage::Heating,
        JobStage::MovingToOffset,
        JobStage::ReadingFile,
        JobStage::ProcessingLine,
        JobStage::ExecutingMovement,
    ];

    for stage in stages {
        let mut config = base_config();
        if stage == JobStage::Heating {
            config.job.preheat_ms = 10_000;
        }
        if stage == JobStage::MovingToOffset {
            config.x.offset = 20.0;
        }
        let mut rig = Rig::new(config);
        rig.project("cut.gcode", "G1 X30 Y30\nG1 X0 Y0\n");
        rig.command(Command::Start);
        rig.run_until(500, |r| r.stage() == stage);

        rig.send_with_priority(Command::Stop, CommandPriority::Emergency);
        rig.tick();

        assert_eq!(rig.mode(), Mode::Stopped, "stop in {stage:?}");
        assert_eq!(rig.stage(), JobStage::Idle, "stop in {stage:?}");
        assert!(!rig.task.job().file_open(), "stop in {stage:?}");
        assert!(!rig.task.state().outputs.hot_wire, "stop in {stage:?}");
        assert_eq!(rig.task.axes().x.remaining_steps(), 0, "stop in {stage:?}");

        rig.command(Command::Reset);
        assert_eq!(rig.mode(), Mode::Idle);
    }
}

#[test]
fn pause_freezes_and_resumes() {
    let mut rig = running(SQUARE);
    rig.run_until(100, |r| r.stage() == JobStage::ExecutingMovement);

    rig.command(Command::Pause);
    assert!(rig.task.state().paused);
    let stage = rig.stage();
    let line = rig.task.state().job.current_line;
    let x = rig.task.axes().x.current_position();

    rig.ticks(50);
    assert_eq!(rig.stage(), stage);
    assert_eq!(rig.task.state().job.current_line, line);
    assert_eq!(rig.task.axes().x.current_position(), x);
    assert_eq!(rig.mode(), Mode::Running);

    rig.command(Command::Pause);
    assert!(!rig.task.state().paused);
    rig.run_until(1_000, |r| r.mode() != Mode::Running);
    assert_eq!(rig.stage(), JobStage::Finished);
}

#[test]
fn malformed_line_fails_job() {
    let mut rig = running("G1 X1\nG1 Xzz\nG1 X5\n");
    rig.run_until(500, |r| r.mode() != Mode::Running);

    assert_eq!(rig.mode(), Mode::Error);
    assert_eq!(rig.stage(), JobStage::Error);
    let state = rig.task.state();
    assert!(state.faults.contains(FaultFlags::GCODE));
    assert!(state.last_error.as_str().starts_with("line 2:"));
    assert_eq!(state.x_mm, 1.0);
    assert!(!rig.task.job().file_open());

    rig.command(Command::Start);
    assert_eq!(rig.mode(), Mode::Error);
    rig.command(Command::Reset);
    assert_eq!(rig.mode(), Mode::Idle);
    assert_eq!(rig.stage(), JobStage::Idle);
    assert!(rig.task.state().faults.is_empty());
}

#[test]
fn start_without_file_stays_idle() {
    let mut rig = Rig::new(base_config());
    rig.gate.select_project("missing.gcode").unwrap();
    rig.command(Command::Start);

    assert_eq!(rig.mode(), Mode::Idle);
    assert_eq!(rig.stage(), JobStage::Idle);
    assert!(!rig.task.state().last_error.is_empty());
    assert!(rig.task.state().faults.is_empty());
}

#[test]
fn progress_never_decreases() {
    let gcode = "G1 X1 Y1\n".repeat(20);
    let mut rig = running(&gcode);

    let mut seen = Vec::new();
    while rig.mode() == Mode::Running {
        rig.tick();
        seen.extend(rig.statuses().into_iter().map(|s| s.progress));
    }

    assert!(seen.len() > 2);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last().copied(), Some(100.0));
}

#[test]
fn held_storage_defers_reading() {
    let mut rig = running(SQUARE);
    rig.run_until(100, |r| r.stage() == JobStage::ReadingFile);
    let line = rig.task.state().job.current_line;

    let gate = Arc::clone(&rig.gate);
    let guard = gate.try_acquire(Duration::ZERO).unwrap();
    rig.ticks(20);
    assert_eq!(rig.stage(), JobStage::ReadingFile);
    assert_eq!(rig.task.state().job.current_line, line);
    assert_eq!(rig.mode(), Mode::Running);
    drop(guard);

    rig.run_until(1_000, |r| r.mode() != Mode::Running);
    assert_eq!(rig.stage(), JobStage::Finished);
    assert_eq!(rig.task.state().job.current_line, 5);
}
