//! System-wide constants for the hot-wire controller.
//!
//! Single source of truth for channel sizes, bounded string lengths and
//! default timing. Imported by both crates.

use static_assertions::const_assert;

/// Slot count of the Command Channel ring (one slot is kept free by the ring).
pub const COMMAND_QUEUE_SLOTS: usize = 16;

/// Slot count of the Status Channel ring.
pub const STATUS_QUEUE_SLOTS: usize = 8;

/// Slot count of the emergency lane beside the Command Channel ring.
pub const EMERGENCY_QUEUE_SLOTS: usize = 4;

/// Commands the arbiter may hold after draining the channel.
pub const PENDING_COMMANDS: usize = 16;

/// Maximum project (file) name length carried in commands and snapshots.
pub const PROJECT_NAME_LEN: usize = 64;

/// Maximum error message length carried in status snapshots.
pub const ERROR_MESSAGE_LEN: usize = 96;

/// Longest G-code line read in one tick, terminator included [bytes].
pub const MAX_LINE_BYTES: usize = 256;

/// Assumed average G-code line length used to estimate total lines.
pub const ESTIMATED_BYTES_PER_LINE: u64 = 20;

/// Default command polling interval [ms].
pub const COMMAND_POLL_MS: u64 = 50;

/// Default command staleness window [ms].
pub const COMMAND_STALE_MS: u64 = 2000;

/// Tick budget while axes are moving [ms].
pub const ACTIVE_TICK_BUDGET_MS: u64 = 10;

/// Tick budget otherwise [ms].
pub const IDLE_TICK_BUDGET_MS: u64 = 50;

/// Default projects directory on the storage device.
pub const DEFAULT_PROJECTS_DIR: &str = "Projects";

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

// Usable capacities after the ring's reserved slot.
const_assert!(COMMAND_QUEUE_SLOTS - 1 >= 10);
const_assert!(STATUS_QUEUE_SLOTS - 1 >= 5);
const_assert!(PENDING_COMMANDS >= COMMAND_QUEUE_SLOTS - 1);
const_assert!(EMERGENCY_QUEUE_SLOTS - 1 >= 2);
const_assert!(MAX_LINE_BYTES >= 80);
