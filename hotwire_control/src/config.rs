//! Configuration loading and the shared configuration provider.
//!
//! `MachineConfig` is loaded from TOML at startup and kept in a
//! [`ConfigStore`] shared by both tasks. The Motion Task never reads the
//! store mid-job: it takes an owned [`ConfigStore::snapshot`] at job start
//! and on `RELOAD_CONFIG`.
//!
//! ## Reload
//!
//! The Supervisory Task re-reads the file from the storage device under the
//! Storage Gate, parses it into a shadow config, validates it, checks the
//! reload scope and only then swaps it in. Any failure leaves the active
//! configuration untouched.

use std::path::Path;
use std::time::Duration;

use hotwire_common::config::{ConfigError, ConfigLoader};
use hotwire_common::machine::config::MachineConfig;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;

use crate::error::StorageError;
use crate::storage::{StorageDevice, StorageGate};

// ─── Loading ────────────────────────────────────────────────────────

/// Load and validate a machine configuration file.
pub fn load_config(path: &Path) -> Result<MachineConfig, ConfigError> {
    let config = MachineConfig::load(path)?;
    config.validate()?;
    info!(
        path = %path.display(),
        projects_dir = %config.projects_dir,
        "configuration loaded"
    );
    Ok(config)
}

/// Parse and validate a configuration from a TOML string.
pub fn load_config_from_str(content: &str) -> Result<MachineConfig, ConfigError> {
    let config = MachineConfig::from_toml(content)?;
    config.validate()?;
    Ok(config)
}

// ─── Reload ─────────────────────────────────────────────────────────

/// Why a configuration reload was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReloadError {
    /// Storage gate not acquired within the timeout.
    #[error("storage busy, reload not attempted")]
    StorageBusy,
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Shadow config failed to parse or validate.
    #[error("reload rejected: {0}")]
    Invalid(#[from] ConfigError),
    /// Shadow config changes a field that needs a restart.
    #[error("reload scope violation: {0}")]
    ScopeViolation(String),
}

/// Reject shadow configs that change non-reloadable fields.
///
/// `projects_dir` fixes the storage layout and needs a restart.
pub fn validate_reload_scope(
    active: &MachineConfig,
    shadow: &MachineConfig,
) -> Result<(), ReloadError> {
    if active.projects_dir != shadow.projects_dir {
        return Err(ReloadError::ScopeViolation(format!(
            "projects_dir changed: {} -> {} (requires restart)",
            active.projects_dir, shadow.projects_dir
        )));
    }
    Ok(())
}

// ─── Provider ───────────────────────────────────────────────────────

/// Shared configuration provider.
///
/// Constructed once at startup and handed to both tasks behind an `Arc`.
#[derive(Debug)]
pub struct ConfigStore {
    active: RwLock<MachineConfig>,
}

impl ConfigStore {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            active: RwLock::new(config),
        }
    }

    /// Owned copy of the active configuration.
    pub fn snapshot(&self) -> MachineConfig {
        self.active.read().clone()
    }

    /// Validate `shadow` against the active config and swap it in.
    pub fn replace(&self, shadow: MachineConfig) -> Result<(), ReloadError> {
        shadow.validate()?;
        let mut active = self.active.write();
        validate_reload_scope(&active, &shadow)?;
        *active = shadow;
        Ok(())
    }

    /// Re-read `path` from the storage device and swap it in.
    ///
    /// The gate is held only while the file is read.
    pub fn reload_from_storage<D: StorageDevice>(
        &self,
        gate: &StorageGate<D>,
        path: &str,
        timeout: Duration,
    ) -> Result<(), ReloadError> {
        let content = {
            let mut device = gate.try_acquire(timeout).ok_or(ReloadError::StorageBusy)?;
            device.read_to_string(path)?
        };
        let shadow = MachineConfig::from_toml(&content)?;
        self.replace(shadow)?;
        info!(path, "configuration reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsStorage;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_rejects_invalid_values() {
        let err = load_config_from_str("[x]\nsteps_per_mm = -1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[job]\nuse_gcode_feed_rate = false\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert!(!cfg.job.use_gcode_feed_rate);
        assert_eq!(
            load_config(&dir.path().join("missing.toml")).unwrap_err(),
            ConfigError::FileNotFound
        );
    }

    #[test]
    fn snapshot_is_detached() {
        let store = ConfigStore::new(MachineConfig::default());
        let snap = store.snapshot();
        let mut changed = MachineConfig::default();
        changed.x.work_feed_rate = 123.0;
        store.replace(changed).unwrap();
        assert_eq!(snap.x.work_feed_rate, 300.0);
        assert_eq!(store.snapshot().x.work_feed_rate, 123.0);
    }

    #[test]
    fn scope_violation_keeps_active() {
        let store = ConfigStore::new(MachineConfig::default());
        let shadow = MachineConfig {
            projects_dir: "Other".into(),
            ..Default::default()
        };
        assert!(matches!(
            store.replace(shadow),
            Err(ReloadError::ScopeViolation(_))
        ));
        assert_eq!(store.snapshot().projects_dir, "Projects");
    }

    #[test]
    fn reload_from_storage_swaps_valid_config() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config.toml"), "[y]\nsteps_per_mm = 40.0\n").unwrap();
        let gate = StorageGate::new(FsStorage::new(dir.path()));
        let store = ConfigStore::new(MachineConfig::default());
        store
            .reload_from_storage(&gate, "config.toml", Duration::from_millis(5))
            .unwrap();
        assert_eq!(store.snapshot().y.steps_per_mm, 40.0);
    }

    #[test]
    fn reload_while_gate_held_is_busy() {
        let dir = tempdir().unwrap();
        let gate = StorageGate::new(FsStorage::new(dir.path()));
        let store = ConfigStore::new(MachineConfig::default());
        let _held = gate.try_acquire(Duration::ZERO);
        assert_eq!(
            store.reload_from_storage(&gate, "config.toml", Duration::ZERO),
            Err(ReloadError::StorageBusy)
        );
    }

    #[test]
    fn reload_of_broken_file_keeps_active() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config.toml"), "[x\n").unwrap();
        let gate = StorageGate::new(FsStorage::new(dir.path()));
        let store = ConfigStore::new(MachineConfig::default());
        let err = store
            .reload_from_storage(&gate, "config.toml", Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, ReloadError::Invalid(ConfigError::ParseError(_))));
        assert_eq!(store.snapshot(), MachineConfig::default());
    }
}
