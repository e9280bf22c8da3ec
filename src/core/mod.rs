pub mod error;
pub mod types;

pub use error::{BackupError, Result};
pub use types::{
    BackupName, Disk, Snapshot, SnapshotStatus, StorageDomain, Vm, VmStatus, human_size,
    SNAPSHOT_DESCRIPTION,
};
