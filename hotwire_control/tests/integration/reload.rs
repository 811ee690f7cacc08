//! Integration test: console-driven configuration reload and job start.

use std::fs;
use std::sync::Arc;

use hotwire_common::machine::state::{JobStage, Mode};
use hotwire_control::storage::FsStorage;
use hotwire_control::supervisor::Supervisor;

use super::harness::{Rig, base_config};

const RELOADED: &str = r#"
projects_dir = "projects"

[x]
steps_per_mm = 10.0
max_travel = 100.0
work_feed_rate = 120.0

[y]
steps_per_mm = 10.0
max_travel = 100.0

[timing]
command_poll_ms = 20
"#;

fn supervisor(rig: &Rig) -> Supervisor<FsStorage> {
    Supervisor::new(Arc::clone(&rig.store), Arc::clone(&rig.gate), "config.toml", false)
}

fn write_config(rig: &Rig, content: &str) {
    fs::write(rig.dir.path().join("config.toml"), content).unwrap();
}

#[test]
fn reload_reaches_motion_task_on_command() {
    let mut rig = Rig::new(base_config());
    let mut console = supervisor(&rig);
    write_config(&rig, RELOADED);

    assert!(console.handle_line(rig.now, "reload", &mut rig.cmd_tx));
    assert_eq!(rig.store.snapshot().x.work_feed_rate, 120.0);
    // The Motion Task keeps its snapshot until RELOAD_CONFIG executes.
    assert_eq!(rig.task.config().x.work_feed_rate, 300.0);

    rig.ticks(6);
    assert_eq!(rig.task.config().x.work_feed_rate, 120.0);
    assert_eq!(rig.task.config().timing.command_poll_ms, 20);
    assert_eq!(rig.task.state().counters.discarded_commands, 0);
}

#[test]
fn projects_dir_change_is_rejected() {
    let mut rig = Rig::new(base_config());
    let mut console = supervisor(&rig);
    write_config(&rig, &RELOADED.replace("\"projects\"", "\"Other\""));

    assert!(console.handle_line(rig.now, "reload", &mut rig.cmd_tx));
    assert_eq!(rig.store.snapshot(), base_config());

    rig.ticks(6);
    assert_eq!(rig.task.config().projects_dir, "projects");
    assert_eq!(rig.task.config().x.work_feed_rate, 300.0);
}

#[test]
fn invalid_file_keeps_active_config() {
    let mut rig = Rig::new(base_config());
    let mut console = supervisor(&rig);
    write_config(&rig, "[x]\nsteps_per_mm = -4.0\n");

    console.handle_line(rig.now, "reload", &mut rig.cmd_tx);
    assert_eq!(rig.store.snapshot(), base_config());
}

#[test]
fn reload_while_running_leaves_job_snapshot() {
    let mut rig = Rig::new(base_config());
    let mut console = supervisor(&rig);
    fs::write(
        rig.dir.path().join("projects/cut.gcode"),
        "G1 X20\nG1 X0\n",
    )
    .unwrap();

    console.handle_line(rig.now, "select cut.gcode", &mut rig.cmd_tx);
    console.handle_line(rig.now, "start", &mut rig.cmd_tx);
    rig.tick();
    assert_eq!(rig.mode(), Mode::Running);

    write_config(&rig, RELOADED);
    console.handle_line(rig.now, "reload", &mut rig.cmd_tx);
    rig.ticks(6);

    // RELOAD_CONFIG is illegal while RUNNING.
    assert_eq!(rig.mode(), Mode::Running);
    assert_eq!(rig.task.state().counters.discarded_commands, 1);
    assert_eq!(rig.task.config().x.work_feed_rate, 300.0);

    rig.run_until(1_000, |r| r.mode() != Mode::Running);
    assert_eq!(rig.stage(), JobStage::Finished);
}
