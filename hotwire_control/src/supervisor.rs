//! Supervisory Task: operator console, status consumer, config reload.
//!
//! ## Console grammar
//!
//! | Input                                  | Effect                          |
//! |----------------------------------------|---------------------------------|
//! | `select <file>`                        | choose the project START runs   |
//! | `start` `stop` `pause` `home`          | job / homing commands           |
//! | `reset` `zero` `estop`                 | machine commands                |
//! | `jog <dx> <dy> [rapid\|work\|<mm/min>]` | relative jog [mm]               |
//! | `wire on\|off`, `fan on\|off`          | accessory switches              |
//! | `wire-power <0-255>`, `fan-power <n>`  | accessory power                 |
//! | `reload`                               | re-read config, then RELOAD     |
//! | `wait <ms>`                            | hold further input (scripts)    |
//! | `status`                               | log the latest snapshot         |
//! | `quit`                                 | shut down                       |
//!
//! Blank lines and lines starting with `#` are ignored. Console input is
//! read on a helper thread; the Supervisory loop only polls.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use hotwire_common::machine::command::{Accessory, Command, JogRequest, JogSpeed};
use hotwire_common::machine::state::StatusSnapshot;
use tracing::{debug, info, warn};

use crate::channel::{CommandSender, StatusReceiver};
use crate::config::ConfigStore;
use crate::error::ConsoleError;
use crate::storage::{StorageDevice, StorageGate};

/// How long the Supervisory Task waits for the storage gate on reload.
pub const RELOAD_GATE_TIMEOUT: Duration = Duration::from_millis(20);

/// Supervisory loop period.
pub const SUPERVISOR_TICK: Duration = Duration::from_millis(20);

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleAction {
    Select(String),
    Send(Command),
    Reload,
    Wait(Duration),
    Status,
    Quit,
}

/// Parse a console line. `Ok(None)` for blank lines and comments.
pub fn parse_console_line(line: &str) -> Result<Option<ConsoleAction>, ConsoleError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let Some(keyword) = words.next() else {
        return Ok(None);
    };

    let action = match keyword.to_ascii_lowercase().as_str() {
        "select" => {
            let name = words.next().ok_or(ConsoleError::MissingArgument("select"))?;
            ConsoleAction::Select(name.to_string())
        }
        "start" => ConsoleAction::Send(Command::Start),
        "stop" => ConsoleAction::Send(Command::Stop),
        "pause" => ConsoleAction::Send(Command::Pause),
        "home" => ConsoleAction::Send(Command::Home),
        "reset" => ConsoleAction::Send(Command::Reset),
        "zero" => ConsoleAction::Send(Command::Zero),
        "estop" => ConsoleAction::Send(Command::EmergencyStop),
        "jog" => {
            let x = parse_mm("jog", words.next())?;
            let y = parse_mm("jog", words.next())?;
            let speed = match words.next() {
                None => JogSpeed::Work,
                Some(s) => parse_jog_speed(s)?,
            };
            let jog = JogRequest::new(x, y, speed);
            if jog.is_empty() {
                return Err(ConsoleError::InvalidArgument {
                    command: "jog",
                    value: format!("{x} {y}"),
                });
            }
            ConsoleAction::Send(Command::Jog(jog))
        }
        "wire" => ConsoleAction::Send(Command::SetAccessory {
            kind: Accessory::HotWire,
            enabled: parse_switch("wire", words.next())?,
        }),
        "fan" => ConsoleAction::Send(Command::SetAccessory {
            kind: Accessory::Fan,
            enabled: parse_switch("fan", words.next())?,
        }),
        "wire-power" => {
            ConsoleAction::Send(Command::SetWirePower(parse_power("wire-power", words.next())?))
        }
        "fan-power" => {
            ConsoleAction::Send(Command::SetFanPower(parse_power("fan-power", words.next())?))
        }
        "reload" => ConsoleAction::Reload,
        "wait" => {
            let ms = words.next().ok_or(ConsoleError::MissingArgument("wait"))?;
            let ms: u64 = ms.parse().map_err(|_| ConsoleError::InvalidArgument {
                command: "wait",
                value: ms.to_string(),
            })?;
            ConsoleAction::Wait(Duration::from_millis(ms))
        }
        "status" => ConsoleAction::Status,
        "quit" | "exit" => ConsoleAction::Quit,
        _ => return Err(ConsoleError::UnknownCommand(keyword.to_string())),
    };
    Ok(Some(action))
}

fn parse_mm(command: &'static str, word: Option<&str>) -> Result<f64, ConsoleError> {
    let word = word.ok_or(ConsoleError::MissingArgument(command))?;
    match word.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ConsoleError::InvalidArgument {
            command,
            value: word.to_string(),
        }),
    }
}

fn parse_jog_speed(word: &str) -> Result<JogSpeed, ConsoleError> {
    match word.to_ascii_lowercase().as_str() {
        "rapid" => Ok(JogSpeed::Rapid),
        "work" => Ok(JogSpeed::Work),
        _ => match word.parse::<f64>() {
            Ok(v) if v.is_finite() && v > 0.0 => Ok(JogSpeed::Explicit(v)),
            _ => Err(ConsoleError::InvalidArgument {
                command: "jog",
                value: word.to_string(),
            }),
        },
    }
}

fn parse_switch(command: &'static str, word: Option<&str>) -> Result<bool, ConsoleError> {
    let word = word.ok_or(ConsoleError::MissingArgument(command))?;
    match word.to_ascii_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(ConsoleError::InvalidArgument {
            command,
            value: word.to_string(),
        }),
    }
}

fn parse_power(command: &'static str, word: Option<&str>) -> Result<u8, ConsoleError> {
    let word = word.ok_or(ConsoleError::MissingArgument(command))?;
    word.parse::<u8>().map_err(|_| ConsoleError::InvalidArgument {
        command,
        value: word.to_string(),
    })
}

/// Read lines from `reader` on a detached helper thread.
///
/// The channel disconnects when the reader hits EOF or fails.
pub fn spawn_line_reader<R>(reader: R) -> Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
        debug!("console input closed");
    });
    rx
}

// ─── Supervisory Task ───────────────────────────────────────────────

/// Supervisory side of the controller.
pub struct Supervisor<D> {
    store: Arc<ConfigStore>,
    gate: Arc<StorageGate<D>>,
    config_path: String,
    json: bool,
    last_status: Option<StatusSnapshot>,
    hold_until: Option<Instant>,
}

impl<D: StorageDevice> Supervisor<D> {
    /// `config_path` is relative to the storage root and is re-read on
    /// `reload`.
    pub fn new(
        store: Arc<ConfigStore>,
        gate: Arc<StorageGate<D>>,
        config_path: impl Into<String>,
        json: bool,
    ) -> Self {
        Self {
            store,
            gate,
            config_path: config_path.into(),
            json,
            last_status: None,
            hold_until: None,
        }
    }

    /// Latest snapshot received from the Motion Task.
    pub fn last_status(&self) -> Option<&StatusSnapshot> {
        self.last_status.as_ref()
    }

    /// Whether console input is held by a `wait`.
    pub fn holding(&self, now: Instant) -> bool {
        self.hold_until.is_some_and(|t| now < t)
    }

    /// Apply one action. Returns `false` on `quit`.
    pub fn handle(&mut self, now: Instant, action: ConsoleAction, tx: &mut CommandSender<'_>) -> bool {
        match action {
            ConsoleAction::Select(name) => {
                match self.gate.select_project(&name) {
                    Ok(()) => info!(project = %name, "project selected"),
                    Err(e) => warn!(error = %e, "selection refused"),
                }
            }
            ConsoleAction::Send(command) => {
                if tx.send(command) {
                    debug!(command = command.name(), "command queued");
                }
            }
            ConsoleAction::Reload => {
                match self
                    .store
                    .reload_from_storage(&self.gate, &self.config_path, RELOAD_GATE_TIMEOUT)
                {
                    Ok(()) => {
                        tx.send(Command::ReloadConfig);
                    }
                    Err(e) => warn!(error = %e, "configuration reload failed"),
                }
            }
            ConsoleAction::Wait(duration) => self.hold_until = Some(now + duration),
            ConsoleAction::Status => match self.last_status.clone() {
                Some(snapshot) => self.report(&snapshot, true),
                None => info!("no status received yet"),
            },
            ConsoleAction::Quit => return false,
        }
        true
    }

    /// Parse and apply a console line. Returns `false` on `quit`.
    pub fn handle_line(&mut self, now: Instant, line: &str, tx: &mut CommandSender<'_>) -> bool {
        match parse_console_line(line) {
            Ok(Some(action)) => self.handle(now, action, tx),
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, "console input rejected");
                true
            }
        }
    }

    /// Drain the Status Channel, logging mode changes and new errors.
    ///
    /// Returns the number of snapshots received.
    pub fn drain_status(&mut self, rx: &mut StatusReceiver<'_>) -> usize {
        let mut received = 0;
        while let Some(snapshot) = rx.try_recv() {
            received += 1;
            let notable = self.last_status.as_ref().is_none_or(|prev| {
                prev.mode != snapshot.mode
                    || prev.job_stage != snapshot.job_stage
                    || prev.last_error != snapshot.last_error
            });
            self.report(&snapshot, notable);
            self.last_status = Some(snapshot);
        }
        received
    }

    fn report(&self, s: &StatusSnapshot, notable: bool) {
        if self.json {
            match serde_json::to_string(s) {
                Ok(json) if notable => info!(target: "status", "{json}"),
                Ok(json) => debug!(target: "status", "{json}"),
                Err(e) => warn!(error = %e, "status serialization failed"),
            }
            return;
        }
        if notable {
            info!(
                seq = s.seq,
                mode = s.mode.name(),
                stage = ?s.job_stage,
                homing = ?s.homing_stage,
                x = s.x_mm,
                y = s.y_mm,
                line = s.current_line,
                progress = s.progress,
                error = s.last_error.as_str(),
                "status"
            );
        } else {
            debug!(
                seq = s.seq,
                mode = s.mode.name(),
                x = s.x_mm,
                y = s.y_mm,
                progress = s.progress,
                "status"
            );
        }
    }

    /// Poll console input and status until `shutdown` is set or `quit`.
    pub fn run(
        &mut self,
        input: Receiver<String>,
        tx: &mut CommandSender<'_>,
        rx: &mut StatusReceiver<'_>,
        shutdown: &AtomicBool,
    ) {
        info!("supervisory task started");
        let mut input_open = true;

        'outer: while !shutdown.load(Ordering::Relaxed) {
            while input_open && !self.holding(Instant::now()) {
                match input.try_recv() {
                    Ok(line) => {
                        if !self.handle_line(Instant::now(), &line, tx) {
                            info!("quit requested");
                            shutdown.store(true, Ordering::SeqCst);
                            break 'outer;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        info!("console input ended");
                        input_open = false;
                    }
                }
            }
            self.drain_status(rx);
            thread::sleep(SUPERVISOR_TICK);
        }

        info!(
            commands_dropped = tx.dropped(),
            last_seq = self.last_status.as_ref().map_or(0, |s| s.seq),
            "supervisory task stopped"
        );
    }
}
