//! Status Publisher: decides when the Motion Task emits a snapshot.
//!
//! A snapshot goes out immediately on a mode change, otherwise at the
//! active cadence (RUNNING/JOG/HOMING) or the idle cadence. A full Status
//! Channel never blocks the Motion Task; the loss is counted and carried
//! in the next snapshot that gets through.

use std::time::{Duration, Instant};

use hotwire_common::machine::config::TimingConfig;
use hotwire_common::machine::state::{Mode, StatusSnapshot};
use tracing::trace;

use crate::channel::StatusSender;

/// Publish cadence and sequence numbering.
#[derive(Debug)]
pub struct StatusPublisher {
    seq: u64,
    last_publish: Option<Instant>,
    last_mode: Option<Mode>,
    active_interval: Duration,
    idle_interval: Duration,
}

impl StatusPublisher {
    pub fn new(timing: &TimingConfig) -> Self {
        Self {
            seq: 0,
            last_publish: None,
            last_mode: None,
            active_interval: Duration::from_millis(timing.status_active_ms),
            idle_interval: Duration::from_millis(timing.status_idle_ms),
        }
    }

    pub fn set_timing(&mut self, timing: &TimingConfig) {
        self.active_interval = Duration::from_millis(timing.status_active_ms);
        self.idle_interval = Duration::from_millis(timing.status_idle_ms);
    }

    /// Sequence number of the last snapshot handed to the channel.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Whether a snapshot for `mode` is due at `now`.
    pub fn due(&self, now: Instant, mode: Mode) -> bool {
        if self.last_mode != Some(mode) {
            return true;
        }
        let interval = if mode.is_active() {
            self.active_interval
        } else {
            self.idle_interval
        };
        self.last_publish
            .is_none_or(|t| now.saturating_duration_since(t) >= interval)
    }

    /// Stamp and send `snapshot` if due. Returns `true` if it was enqueued.
    pub fn publish(
        &mut self,
        now: Instant,
        mut snapshot: StatusSnapshot,
        tx: &mut StatusSender<'_>,
    ) -> bool {
        if !self.due(now, snapshot.mode) {
            return false;
        }
        self.last_publish = Some(now);
        let mode = snapshot.mode;

        self.seq += 1;
        snapshot.seq = self.seq;
        snapshot.status_dropped = tx.dropped();
        let sent = tx.send(snapshot);
        if sent {
            // A mode change stays due until it actually gets through.
            self.last_mode = Some(mode);
        } else {
            trace!(seq = self.seq, dropped = tx.dropped(), "status channel full");
        }
        sent
    }
}
