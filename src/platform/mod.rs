use crate::core::{Disk, Result, Snapshot, StorageDomain, Vm, VmStatus};
use async_trait::async_trait;

pub mod rest;

#[cfg(feature = "mock")]
pub mod mock;

pub use rest::RestGateway;

#[cfg(feature = "mock")]
pub use mock::MockPlatform;

/// Placement flags for an export request.
///
/// Backups always go out exclusive (replace a same-named entity on the
/// target) and with intermediate snapshot chains discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub storage_domain: String,
    pub exclusive: bool,
    pub discard_snapshots: bool,
}

impl ExportRequest {
    pub fn to_domain(storage_domain: &str) -> Self {
        Self {
            storage_domain: storage_domain.to_string(),
            exclusive: true,
            discard_snapshots: true,
        }
    }
}

/// Capability surface of the virtualization management platform.
///
/// The orchestrator consumes only this trait; it never talks wire protocol.
/// Implementations: [`RestGateway`] against a live engine, [`MockPlatform`]
/// for tests.
#[async_trait]
pub trait PlatformGateway: Send + Sync {
    /// Liveness test for the engine session.
    async fn test_connection(&self) -> Result<bool>;

    async fn cluster_exists(&self, name: &str) -> Result<bool>;

    async fn storage_domain_by_name(&self, name: &str) -> Result<Option<StorageDomain>>;

    /// Exact-name VM lookup; `Ok(None)` when no such VM exists.
    async fn vm_by_name(&self, name: &str) -> Result<Option<Vm>>;

    async fn vm_status(&self, vm_id: &str) -> Result<VmStatus>;

    async fn attached_disks(&self, vm_id: &str) -> Result<Vec<Disk>>;

    async fn snapshots(&self, vm_id: &str) -> Result<Vec<Snapshot>>;

    /// Re-fetch one snapshot; `Ok(None)` when it no longer exists.
    async fn snapshot(&self, vm_id: &str, snapshot_id: &str) -> Result<Option<Snapshot>>;

    async fn snapshot_disks(&self, vm_id: &str, snapshot_id: &str) -> Result<Vec<Disk>>;

    async fn create_snapshot(
        &self,
        vm_id: &str,
        description: &str,
        persist_memorystate: bool,
    ) -> Result<Snapshot>;

    async fn delete_snapshot(&self, vm_id: &str, snapshot_id: &str) -> Result<()>;

    /// Create a new standalone VM seeded from a snapshot.
    async fn clone_vm_from_snapshot(
        &self,
        vm_id: &str,
        snapshot_id: &str,
        clone_name: &str,
        cluster: &str,
    ) -> Result<Vm>;

    async fn export_vm(&self, vm_id: &str, request: &ExportRequest) -> Result<()>;

    async fn delete_vm(&self, vm_id: &str) -> Result<()>;

    /// VM entities stored on an export domain (completed backups).
    async fn export_entries(&self, export_domain: &str) -> Result<Vec<Vm>>;

    async fn delete_export_entry(&self, export_domain: &str, vm_id: &str) -> Result<()>;

    /// Release the engine session. Called exactly once per run, on every
    /// exit path.
    async fn close(&self) -> Result<()>;
}
