//! Bounded single-producer/single-consumer channels between the tasks.
//!
//! Both channels are `heapless::spsc` rings split into producer/consumer
//! halves. Producers never block: a value that does not fit is dropped
//! (drop-newest) and counted on the sending half.
//!
//! `Emergency`-class commands bypass the command ring through a short lane
//! of their own, and an EMERGENCY_STOP that finds even that lane full sets a
//! latch instead. The receiver yields the lane before the ring, so a flood
//! of ordinary commands can neither delay nor drop an emergency stop.
//!
//! ```text
//!  Supervisory ──CommandSender──▶ [CommandQueue] ──CommandReceiver──▶ Motion
//!  Supervisory ◀─StatusReceiver── [StatusQueue]  ◀──StatusSender───── Motion
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use heapless::spsc::{Consumer, Producer, Queue};
use hotwire_common::consts::{COMMAND_QUEUE_SLOTS, EMERGENCY_QUEUE_SLOTS, STATUS_QUEUE_SLOTS};
use hotwire_common::machine::command::{Command, CommandEnvelope, CommandPriority};
use hotwire_common::machine::state::StatusSnapshot;
use tracing::warn;

/// Backing storage of the Command Channel.
pub struct CommandQueue {
    ring: Queue<CommandEnvelope, COMMAND_QUEUE_SLOTS>,
    emergency: Queue<CommandEnvelope, EMERGENCY_QUEUE_SLOTS>,
    estop_latch: AtomicBool,
}

impl CommandQueue {
    pub const fn new() -> Self {
        Self {
            ring: Queue::new(),
            emergency: Queue::new(),
            estop_latch: AtomicBool::new(false),
        }
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Backing ring of the Status Channel.
pub type StatusQueue = Queue<StatusSnapshot, STATUS_QUEUE_SLOTS>;

/// Split a command ring into its two halves.
pub fn command_channel(queue: &mut CommandQueue) -> (CommandSender<'_>, CommandReceiver<'_>) {
    let CommandQueue {
        ring,
        emergency,
        estop_latch,
    } = queue;
    let estop_latch: &AtomicBool = estop_latch;
    let (producer, consumer) = ring.split();
    let (urgent_producer, urgent_consumer) = emergency.split();
    (
        CommandSender {
            producer,
            urgent: urgent_producer,
            estop_latch,
            dropped: 0,
        },
        CommandReceiver {
            consumer,
            urgent: urgent_consumer,
            estop_latch,
        },
    )
}

/// Split a status ring into its two halves.
pub fn status_channel(queue: &mut StatusQueue) -> (StatusSender<'_>, StatusReceiver<'_>) {
    let (producer, consumer) = queue.split();
    (
        StatusSender {
            producer,
            dropped: 0,
        },
        StatusReceiver { consumer },
    )
}

// ─── Command Channel ────────────────────────────────────────────────

/// Supervisory side of the Command Channel.
pub struct CommandSender<'a> {
    producer: Producer<'a, CommandEnvelope, COMMAND_QUEUE_SLOTS>,
    urgent: Producer<'a, CommandEnvelope, EMERGENCY_QUEUE_SLOTS>,
    estop_latch: &'a AtomicBool,
    dropped: u32,
}

impl CommandSender<'_> {
    /// Enqueue `command` stamped with the current time and its default
    /// priority. Returns `false` if the channel was full.
    pub fn send(&mut self, command: Command) -> bool {
        self.send_envelope(CommandEnvelope::new(command, Instant::now()))
    }

    /// Enqueue a prepared envelope. Returns `false` if the channel was full.
    ///
    /// An EMERGENCY_STOP is never refused.
    pub fn send_envelope(&mut self, envelope: CommandEnvelope) -> bool {
        let envelope = if envelope.priority == CommandPriority::Emergency {
            match self.urgent.enqueue(envelope) {
                Ok(()) => return true,
                Err(rejected) if rejected.command == Command::EmergencyStop => {
                    self.estop_latch.store(true, Ordering::Release);
                    warn!("emergency lane full, emergency stop latched");
                    return true;
                }
                Err(rejected) => rejected,
            }
        } else {
            envelope
        };

        match self.producer.enqueue(envelope) {
            Ok(()) => true,
            Err(rejected) => {
                self.dropped = self.dropped.saturating_add(1);
                warn!(
                    command = rejected.command.name(),
                    dropped = self.dropped,
                    "command channel full, command dropped"
                );
                false
            }
        }
    }

    /// Commands dropped on a full channel.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

/// Motion side of the Command Channel.
pub struct CommandReceiver<'a> {
    consumer: Consumer<'a, CommandEnvelope, COMMAND_QUEUE_SLOTS>,
    urgent: Consumer<'a, CommandEnvelope, EMERGENCY_QUEUE_SLOTS>,
    estop_latch: &'a AtomicBool,
}

impl CommandReceiver<'_> {
    /// Next queued envelope, emergency lane first.
    ///
    /// The emergency-stop latch is not an envelope; see
    /// [`take_estop_latch`](Self::take_estop_latch).
    pub fn try_recv(&mut self) -> Option<CommandEnvelope> {
        self.urgent.dequeue().or_else(|| self.consumer.dequeue())
    }

    /// Consume the emergency-stop latch. `true` means an EMERGENCY_STOP was
    /// sent while the emergency lane was full.
    pub fn take_estop_latch(&mut self) -> bool {
        self.estop_latch.swap(false, Ordering::AcqRel)
    }

    /// Queued envelopes plus a set latch.
    pub fn len(&self) -> usize {
        self.urgent.len()
            + self.consumer.len()
            + usize::from(self.estop_latch.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Status Channel ─────────────────────────────────────────────────

/// Motion side of the Status Channel.
pub struct StatusSender<'a> {
    producer: Producer<'a, StatusSnapshot, STATUS_QUEUE_SLOTS>,
    dropped: u32,
}

impl StatusSender<'_> {
    /// Publish a snapshot. Returns `false` (and counts) if the channel was full.
    pub fn send(&mut self, snapshot: StatusSnapshot) -> bool {
        if self.producer.enqueue(snapshot).is_ok() {
            true
        } else {
            self.dropped = self.dropped.saturating_add(1);
            false
        }
    }

    /// Snapshots dropped on a full channel.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

/// Supervisory side of the Status Channel.
pub struct StatusReceiver<'a> {
    consumer: Consumer<'a, StatusSnapshot, STATUS_QUEUE_SLOTS>,
}

impl StatusReceiver<'_> {
    pub fn try_recv(&mut self) -> Option<StatusSnapshot> {
        self.consumer.dequeue()
    }

    /// Drain everything, keeping only the newest snapshot.
    pub fn latest(&mut self) -> Option<StatusSnapshot> {
        let mut last = None;
        while let Some(s) = self.consumer.dequeue() {
            last = Some(s);
        }
        last
    }
}
