// ============================================================================
// vmbackup Library
// ============================================================================

pub mod clock;
pub mod clone;
pub mod config;
pub mod core;
pub mod export;
pub mod notify;
pub mod orchestrator;
pub mod platform;
pub mod retention;
pub mod snapshot;
pub mod space;

// Re-export main types for convenience
pub use crate::core::{
    BackupError, BackupName, Disk, Result, Snapshot, SnapshotStatus, StorageDomain, Vm, VmStatus,
    SNAPSHOT_DESCRIPTION,
};

pub use clock::{Clock, SystemClock};
pub use config::{AppConfig, RunConfig};
pub use notify::{NotificationSink, NullNotifier, WebhookNotifier};
pub use orchestrator::BackupOrchestrator;
pub use platform::{ExportRequest, PlatformGateway, RestGateway};

#[cfg(feature = "mock")]
pub use clock::ManualClock;
#[cfg(feature = "mock")]
pub use notify::RecordingNotifier;
#[cfg(feature = "mock")]
pub use platform::MockPlatform;
