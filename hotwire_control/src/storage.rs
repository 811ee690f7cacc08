//! Shared storage device and the gate arbitrating access to it.

pub mod device;
pub mod gate;

pub use device::{FsFile, FsStorage, StorageDevice, StorageFile};
pub use gate::StorageGate;
