//! Error taxonomy for the controller.
//!
//! Recoverable-transient conditions (storage contention) never become
//! errors here; they are retried on the next tick. Everything below either
//! keeps the machine IDLE (`JobStartError`), terminates a job
//! (`LineError`, `StorageError` mid-job) or stays on the Supervisory side
//! (`ConsoleError`).

use thiserror::Error;

/// Storage gate / device failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// File does not exist.
    #[error("file not found: {0}")]
    NotFound(String),
    /// Device read/open failure.
    #[error("storage I/O error: {0}")]
    Io(String),
    /// Project name that would leave the projects directory.
    #[error("invalid project name: {0}")]
    InvalidName(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Line interpretation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GcodeError {
    /// Parameter token without a letter or without a value.
    #[error("malformed word '{0}'")]
    MalformedWord(String),
    /// Parameter value is not a number.
    #[error("invalid number in '{0}'")]
    InvalidNumber(String),
    /// Parameter value is NaN or infinite.
    #[error("non-finite value in '{0}'")]
    NonFinite(String),
    /// No line terminator within the per-tick read limit.
    #[error("line longer than {0} bytes")]
    LineTooLong(usize),
}

/// A `GcodeError` with the line it occurred on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {error}")]
pub struct LineError {
    /// 1-based line number.
    pub line: u32,
    #[source]
    pub error: GcodeError,
}

/// Why a START command left the machine IDLE.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobStartError {
    #[error("no project selected")]
    NoProjectSelected,
    #[error("storage busy at job start")]
    StorageBusy,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Operator console parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("missing argument for '{0}'")]
    MissingArgument(&'static str),
    #[error("invalid argument '{value}' for '{command}'")]
    InvalidArgument {
        command: &'static str,
        value: String,
    },
}
