//! G-code line parser and move planner.
//!
//! Accepted syntax: whitespace-separated letter+number words, `;` starts a
//! comment, letters are case-insensitive. The first word selects the
//! action:
//!
//! | Word        | Effect                                            |
//! |-------------|---------------------------------------------------|
//! | `G0`/`G1`   | move; optional `X`, `Y`, `F`                      |
//! | `G28`       | zero logical position, no motion                  |
//! | `G90`/`G91` | absolute / relative positioning                   |
//! | `M0`/`M1`   | pause                                             |
//! | `M3 [S]`    | hot wire on (S = power 0-255)                     |
//! | `M5`        | hot wire off                                      |
//! | `M106 [S]`  | fan on (S = power 0-255)                          |
//! | `M107`      | fan off                                           |
//! | `F<n>`      | modal feed rate, no motion                        |
//!
//! Unknown words and unsupported codes are no-ops. A malformed or
//! non-numeric parameter on a supported word is an error.

use hotwire_common::machine::config::{AxisConfig, MachineConfig, MotionProfile};
use hotwire_common::machine::state::Positioning;
use tracing::debug;

use crate::error::GcodeError;

/// Parameters of a `G0`/`G1` line.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveWord {
    /// `G0` (rapid) rather than `G1`.
    pub rapid: bool,
    pub x: Option<f64>,
    pub y: Option<f64>,
    /// Feed rate [mm/min].
    pub feed: Option<f64>,
}

/// One interpreted line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Block {
    Move(MoveWord),
    /// `G28`: soft re-reference.
    SoftHome,
    SetPositioning(Positioning),
    Pause,
    HotWire { on: bool, power: Option<u8> },
    Fan { on: bool, power: Option<u8> },
    /// Bare `F` word [mm/min].
    FeedRate(f64),
}

/// Parse one line. `Ok(None)` for blank lines, comments and unsupported
/// words.
pub fn parse_line(line: &str) -> Result<Option<Block>, GcodeError> {
    let code = match line.find(';') {
        Some(i) => &line[..i],
        None => line,
    };
    let mut words = code.split_whitespace();
    let Some(first) = words.next() else {
        return Ok(None);
    };

    let Ok((letter, value)) = split_word(first) else {
        debug!(word = first, "unrecognized word ignored");
        return Ok(None);
    };

    if letter == 'F' {
        return Ok(Some(Block::FeedRate(parse_feed(first, value)?)));
    }

    let Ok(number) = value.parse::<u16>() else {
        debug!(word = first, "unsupported code ignored");
        return Ok(None);
    };

    let block = match (letter, number) {
        ('G', 0 | 1) => {
            let mut mv = MoveWord {
                rapid: number == 0,
                ..Default::default()
            };
            for token in words {
                let (l, v) = split_word(token)?;
                match l {
                    'X' => mv.x = Some(parse_number(token, v)?),
                    'Y' => mv.y = Some(parse_number(token, v)?),
                    'F' => mv.feed = Some(parse_feed(token, v)?),
                    _ => {}
                }
            }
            Block::Move(mv)
        }
        ('G', 28) => Block::SoftHome,
        ('G', 90) => Block::SetPositioning(Positioning::Absolute),
        ('G', 91) => Block::SetPositioning(Positioning::Relative),
        ('M', 0 | 1) => Block::Pause,
        ('M', 3) => Block::HotWire {
            on: true,
            power: parse_power(words)?,
        },
        ('M', 5) => Block::HotWire {
            on: false,
            power: None,
        },
        ('M', 106) => Block::Fan {
            on: true,
            power: parse_power(words)?,
        },
        ('M', 107) => Block::Fan {
            on: false,
            power: None,
        },
        _ => {
            debug!(word = first, "unsupported code ignored");
            return Ok(None);
        }
    };
    Ok(Some(block))
}

fn split_word(token: &str) -> Result<(char, &str), GcodeError> {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() && !chars.as_str().is_empty() => {
            Ok((c.to_ascii_uppercase(), chars.as_str()))
        }
        _ => Err(GcodeError::MalformedWord(token.to_string())),
    }
}

fn parse_number(token: &str, value: &str) -> Result<f64, GcodeError> {
    let v: f64 = value
        .parse()
        .map_err(|_| GcodeError::InvalidNumber(token.to_string()))?;
    if !v.is_finite() {
        return Err(GcodeError::NonFinite(token.to_string()));
    }
    Ok(v)
}

fn parse_feed(token: &str, value: &str) -> Result<f64, GcodeError> {
    let v = parse_number(token, value)?;
    if v <= 0.0 {
        return Err(GcodeError::InvalidNumber(token.to_string()));
    }
    Ok(v)
}

fn parse_power<'a>(words: impl Iterator<Item = &'a str>) -> Result<Option<u8>, GcodeError> {
    let mut power = None;
    for token in words {
        let (l, v) = split_word(token)?;
        if l == 'S' {
            let s = parse_number(token, v)?;
            power = Some(s.round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(power)
}

// ─── Planning ───────────────────────────────────────────────────────

/// A move resolved to absolute targets and per-axis profiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedMove {
    /// Absolute target [mm].
    pub x_mm: f64,
    pub y_mm: f64,
    /// Absolute target [steps], rounded to the nearest step.
    pub x_steps: i64,
    pub y_steps: i64,
    pub x_profile: MotionProfile,
    pub y_profile: MotionProfile,
}

/// Resolve a move word against the current position.
///
/// `feed` is the line's `F` value, or the modal feed when the line has none.
pub fn plan_move(
    config: &MachineConfig,
    from: [f64; 2],
    positioning: Positioning,
    word: &MoveWord,
    feed: Option<f64>,
) -> PlannedMove {
    let resolve = |current: f64, value: Option<f64>| match (value, positioning) {
        (None, _) => current,
        (Some(v), Positioning::Absolute) => v,
        (Some(v), Positioning::Relative) => current + v,
    };
    let x_mm = resolve(from[0], word.x);
    let y_mm = resolve(from[1], word.y);
    let use_feed = config.job.use_gcode_feed_rate;

    PlannedMove {
        x_mm,
        y_mm,
        x_steps: config.x.to_steps(x_mm),
        y_steps: config.y.to_steps(y_mm),
        x_profile: axis_profile(&config.x, word.rapid, feed, use_feed),
        y_profile: axis_profile(&config.y, word.rapid, feed, use_feed),
    }
}

/// G0: rapid rate and acceleration. G1: work acceleration, feed clamped to
/// the work ceiling (or the work rate when G-code feed is disabled).
fn axis_profile(axis: &AxisConfig, rapid: bool, feed: Option<f64>, use_feed: bool) -> MotionProfile {
    if rapid {
        return axis.rapid_profile();
    }
    let rate = match feed {
        Some(f) if use_feed => f.min(axis.work_feed_rate),
        _ => axis.work_feed_rate,
    };
    axis.profile(rate, axis.work_acceleration)
}
