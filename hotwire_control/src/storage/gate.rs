//! Storage Gate: mutual exclusion around the shared storage device.
//!
//! Both tasks call [`StorageGate::try_acquire`]. The Motion Task always
//! passes a zero timeout and retries on its next tick; the Supervisory Task
//! may wait a few milliseconds. Dropping the guard releases the gate.
//!
//! The gate also carries the selected project name, under its own lock so
//! that selecting a project never contends with file reads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hotwire_common::machine::state::{ProjectName, bounded};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use super::device::StorageDevice;
use crate::error::StorageError;

/// Lock-protected storage device shared by both tasks.
#[derive(Debug)]
pub struct StorageGate<D> {
    device: Mutex<D>,
    selected: Mutex<Option<ProjectName>>,
    contention: AtomicU64,
}

impl<D: StorageDevice> StorageGate<D> {
    pub fn new(device: D) -> Self {
        Self {
            device: Mutex::new(device),
            selected: Mutex::new(None),
            contention: AtomicU64::new(0),
        }
    }

    /// Try to take the gate within `timeout`.
    ///
    /// `Duration::ZERO` never waits. Returns `None` (and counts the
    /// contention) if the other task holds the gate.
    pub fn try_acquire(&self, timeout: Duration) -> Option<MutexGuard<'_, D>> {
        let guard = if timeout.is_zero() {
            self.device.try_lock()
        } else {
            self.device.try_lock_for(timeout)
        };
        if guard.is_none() {
            let n = self.contention.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(contention = n, "storage gate busy");
        }
        guard
    }

    /// Number of failed acquisitions so far.
    pub fn contention_count(&self) -> u64 {
        self.contention.load(Ordering::Relaxed)
    }

    /// Select the project START will run. An empty name clears the
    /// selection; names with path separators or `..` are refused.
    pub fn select_project(&self, name: &str) -> Result<(), StorageError> {
        let name = name.trim();
        if name.contains(['/', '\\']) || name.contains("..") {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        let name: ProjectName = bounded(name);
        debug!(project = %name, "project selected");
        *self.selected.lock() = if name.is_empty() { None } else { Some(name) };
        Ok(())
    }

    /// Currently selected project.
    pub fn selected_project(&self) -> Option<ProjectName> {
        self.selected.lock().clone()
    }

    pub fn clear_selection(&self) {
        *self.selected.lock() = None;
    }
}
