//! Command arbitration.
//!
//! Every tick the arbiter drains the Command Channel completely into a small
//! pending list and hands back at most one command. When the list is full,
//! the oldest entry of the lowest class makes room for a higher-class
//! newcomer; otherwise the newcomer is dropped. Either way the loss is
//! counted.
//!
//! 1. Commands older than the staleness window are dropped and counted.
//! 2. The highest-priority pending command is selected; ties go to the
//!    earliest arrival.
//! 3. `Emergency`-class commands are released on the tick they are seen.
//!    Any other class is released at most once per polling interval.
//!
//! The arbiter only selects. Legality for the current mode and the actual
//! effect are decided by the Motion Task.

use std::time::{Duration, Instant};

use heapless::Vec;
use hotwire_common::consts::PENDING_COMMANDS;
use hotwire_common::machine::command::{Command, CommandEnvelope, CommandPriority};
use hotwire_common::machine::config::TimingConfig;
use tracing::{debug, warn};

use crate::channel::CommandReceiver;

/// Priority-aware command selector.
#[derive(Debug)]
pub struct CommandArbiter {
    pending: Vec<CommandEnvelope, PENDING_COMMANDS>,
    poll_interval: Duration,
    stale_after: Duration,
    last_released: Option<Instant>,
    stale_dropped: u32,
    overflow_dropped: u32,
}

impl CommandArbiter {
    pub fn new(timing: &TimingConfig) -> Self {
        Self {
            pending: Vec::new(),
            poll_interval: Duration::from_millis(timing.command_poll_ms),
            stale_after: Duration::from_millis(timing.command_stale_ms),
            last_released: None,
            stale_dropped: 0,
            overflow_dropped: 0,
        }
    }

    /// Apply new timing (after a configuration reload).
    pub fn set_timing(&mut self, timing: &TimingConfig) {
        self.poll_interval = Duration::from_millis(timing.command_poll_ms);
        self.stale_after = Duration::from_millis(timing.command_stale_ms);
    }

    /// Move every queued command from the channel into the pending list.
    ///
    /// A latched emergency stop is admitted first, stamped `now`.
    pub fn collect(&mut self, rx: &mut CommandReceiver<'_>, now: Instant) {
        if rx.take_estop_latch() {
            self.admit(CommandEnvelope::new(Command::EmergencyStop, now));
        }
        while let Some(envelope) = rx.try_recv() {
            self.admit(envelope);
        }
    }

    fn admit(&mut self, envelope: CommandEnvelope) {
        let Err(envelope) = self.pending.push(envelope) else {
            return;
        };
        // First minimum is the oldest of the lowest class.
        let lowest = self
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, env)| env.priority)
            .map(|(i, env)| (i, env.priority));

        let lost = match lowest {
            Some((index, priority)) if priority < envelope.priority => {
                let evicted = self.pending.remove(index);
                let _ = self.pending.push(envelope);
                evicted
            }
            _ => envelope,
        };
        self.overflow_dropped = self.overflow_dropped.saturating_add(1);
        warn!(
            command = lost.command.name(),
            priority = ?lost.priority,
            "pending commands full, command dropped"
        );
    }

    /// Offer a command directly (tests, internal sources).
    ///
    /// Returns the envelope back if the pending list is full.
    pub fn offer(&mut self, envelope: CommandEnvelope) -> Result<(), CommandEnvelope> {
        self.pending.push(envelope)
    }

    /// Select the command to execute this tick, if any.
    pub fn next(&mut self, now: Instant) -> Option<CommandEnvelope> {
        self.purge_stale(now);

        let mut best: Option<(usize, CommandPriority)> = None;
        for (i, env) in self.pending.iter().enumerate() {
            if best.is_none_or(|(_, p)| env.priority > p) {
                best = Some((i, env.priority));
            }
        }
        let (index, priority) = best?;

        if priority != CommandPriority::Emergency {
            let due = self
                .last_released
                .is_none_or(|t| now.saturating_duration_since(t) >= self.poll_interval);
            if !due {
                return None;
            }
            self.last_released = Some(now);
        }

        let envelope = self.pending.remove(index);
        debug!(
            command = envelope.command.name(),
            priority = ?envelope.priority,
            waiting = self.pending.len(),
            "command released"
        );
        Some(envelope)
    }

    fn purge_stale(&mut self, now: Instant) {
        let stale_after = self.stale_after;
        let before = self.pending.len();
        self.pending.retain(|env| {
            let stale = env.age(now) > stale_after;
            if stale {
                warn!(
                    command = env.command.name(),
                    age_ms = env.age(now).as_millis() as u64,
                    "stale command dropped"
                );
            }
            !stale
        });
        let purged = (before - self.pending.len()) as u32;
        self.stale_dropped = self.stale_dropped.saturating_add(purged);
    }

    /// Commands dropped for staleness since start.
    pub fn stale_dropped(&self) -> u32 {
        self.stale_dropped
    }

    /// Commands lost to a full pending list since the last call.
    pub fn take_overflow(&mut self) -> u32 {
        std::mem::take(&mut self.overflow_dropped)
    }

    /// Commands waiting for release.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{CommandQueue, command_channel};
    use hotwire_common::machine::command::Command;

    fn arbiter() -> CommandArbiter {
        CommandArbiter::new(&TimingConfig::default())
    }

    #[test]
    fn emergency_overtakes_earlier_command() {
        let t0 = Instant::now();
        let mut arb = arbiter();
        arb.offer(CommandEnvelope::new(Command::Stop, t0).with_priority(CommandPriority::Normal))
            .unwrap();
        arb.offer(CommandEnvelope::new(Command::Reset, t0 + Duration::from_millis(1)))
            .unwrap();

        let first = arb.next(t0 + Duration::from_millis(2)).unwrap();
        assert_eq!(first.command, Command::Reset);
        let second = arb.next(t0 + Duration::from_millis(3)).unwrap();
        assert_eq!(second.command, Command::Stop);
    }

    #[test]
    fn fifo_among_equal_priority() {
        let t0 = Instant::now();
        let mut arb = arbiter();
        arb.offer(CommandEnvelope::new(Command::Home, t0)).unwrap();
        arb.offer(CommandEnvelope::new(Command::Zero, t0)).unwrap();
        assert_eq!(arb.next(t0).unwrap().command, Command::Home);
        let later = t0 + Duration::from_millis(50);
        assert_eq!(arb.next(later).unwrap().command, Command::Zero);
    }

    #[test]
    fn normal_commands_rate_limited_by_poll_interval() {
        let t0 = Instant::now();
        let mut arb = arbiter();
        arb.offer(CommandEnvelope::new(Command::Home, t0)).unwrap();
        arb.offer(CommandEnvelope::new(Command::Zero, t0)).unwrap();

        assert!(arb.next(t0).is_some());
        assert!(arb.next(t0 + Duration::from_millis(10)).is_none());
        assert_eq!(arb.pending(), 1);
        assert!(arb.next(t0 + Duration::from_millis(50)).is_some());
    }

    #[test]
    fn emergency_not_rate_limited() {
        let t0 = Instant::now();
        let mut arb = arbiter();
        arb.offer(CommandEnvelope::new(Command::Home, t0)).unwrap();
        assert!(arb.next(t0).is_some());
        arb.offer(CommandEnvelope::new(Command::EmergencyStop, t0)).unwrap();
        assert_eq!(
            arb.next(t0 + Duration::from_millis(1)).unwrap().command,
            Command::EmergencyStop
        );
    }

    #[test]
    fn stale_commands_dropped_and_counted() {
        let t0 = Instant::now();
        let mut arb = arbiter();
        arb.offer(CommandEnvelope::new(Command::Start, t0)).unwrap();
        arb.offer(CommandEnvelope::new(Command::Zero, t0 + Duration::from_millis(2500)))
            .unwrap();

        let got = arb.next(t0 + Duration::from_millis(2600)).unwrap();
        assert_eq!(got.command, Command::Zero);
        assert_eq!(arb.stale_dropped(), 1);
        assert_eq!(arb.pending(), 0);
    }

    #[test]
    fn one_command_per_call() {
        let t0 = Instant::now();
        let mut arb = arbiter();
        arb.offer(CommandEnvelope::new(Command::EmergencyStop, t0)).unwrap();
        arb.offer(CommandEnvelope::new(Command::Reset, t0)).unwrap();
        assert!(arb.next(t0).is_some());
        assert_eq!(arb.pending(), 1);
    }

    #[test]
    fn collect_drains_channel() {
        let mut q = CommandQueue::new();
        let (mut tx, mut rx) = command_channel(&mut q);
        tx.send(Command::Home);
        tx.send(Command::EmergencyStop);
        let mut arb = arbiter();
        arb.collect(&mut rx, Instant::now());
        assert_eq!(arb.pending(), 2);
        assert!(rx.is_empty());
        assert_eq!(arb.next(Instant::now()).unwrap().command, Command::EmergencyStop);
    }

    fn fill(arb: &mut CommandArbiter, command: Command, t0: Instant) {
        for _ in 0..PENDING_COMMANDS {
            arb.offer(CommandEnvelope::new(command, t0)).unwrap();
        }
    }

    #[test]
    fn full_list_evicts_oldest_lowest_for_higher_class() {
        let t0 = Instant::now();
        let mut arb = arbiter();
        arb.offer(CommandEnvelope::new(Command::ReloadConfig, t0)).unwrap();
        for _ in 1..PENDING_COMMANDS {
            arb.offer(CommandEnvelope::new(Command::Zero, t0)).unwrap();
        }

        arb.admit(CommandEnvelope::new(Command::Stop, t0));
        assert_eq!(arb.pending(), PENDING_COMMANDS);
        assert_eq!(arb.take_overflow(), 1);
        assert_eq!(arb.take_overflow(), 0);
        assert!(arb.pending.iter().all(|e| e.command != Command::ReloadConfig));
        assert_eq!(arb.next(t0).unwrap().command, Command::Stop);
    }

    #[test]
    fn full_list_drops_equal_class_newcomer() {
        let t0 = Instant::now();
        let mut arb = arbiter();
        fill(&mut arb, Command::Zero, t0);
        arb.admit(CommandEnvelope::new(Command::Home, t0));
        assert_eq!(arb.take_overflow(), 1);
        assert!(arb.pending.iter().all(|e| e.command == Command::Zero));
    }

    #[test]
    fn collect_drains_past_a_full_list() {
        let mut q = CommandQueue::new();
        let (mut tx, mut rx) = command_channel(&mut q);
        let t0 = Instant::now();
        let mut arb = arbiter();
        fill(&mut arb, Command::Zero, t0);

        while tx.send(Command::Home) {}
        tx.send(Command::EmergencyStop);
        arb.collect(&mut rx, t0);

        assert!(rx.is_empty());
        assert_eq!(arb.pending(), PENDING_COMMANDS);
        assert_eq!(arb.next(t0).unwrap().command, Command::EmergencyStop);
    }

    #[test]
    fn latched_estop_is_collected() {
        let mut q = CommandQueue::new();
        let (mut tx, mut rx) = command_channel(&mut q);
        while tx.send(Command::Reset) {}
        assert!(tx.send(Command::EmergencyStop));

        let t0 = Instant::now();
        let mut arb = arbiter();
        arb.collect(&mut rx, t0);
        let first = arb.next(t0).unwrap();
        assert_eq!(first.command, Command::EmergencyStop);
        assert_eq!(first.issued_at, t0);
    }

    #[test]
    fn empty_arbiter_yields_nothing() {
        let mut arb = arbiter();
        assert!(arb.next(Instant::now()).is_none());
        assert_eq!(arb.stale_dropped(), 0);
    }
}
