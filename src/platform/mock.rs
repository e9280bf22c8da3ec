//! Scriptable in-memory platform for tests.
//!
//! Asynchronous platform operations are modeled as poll countdowns: a fresh
//! snapshot stays `Locked` for a configured number of status fetches before
//! flipping to `Ok`, a clone or export stays `ImageLocked` before reaching
//! `Down`. A countdown of [`MockPlatform::STUCK`] never completes, which is
//! how timeout paths are exercised.

use super::{ExportRequest, PlatformGateway};
use crate::core::{
    BackupError, Disk, Result, Snapshot, SnapshotStatus, StorageDomain, Vm, VmStatus,
    SNAPSHOT_DESCRIPTION,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

struct MockSnapshot {
    snap: Snapshot,
    polls_until_ok: u32,
    /// `Some(n)` once deletion was requested: the snapshot stays visible for
    /// `n` more status fetches before it disappears.
    polls_until_gone: Option<u32>,
    disks: Vec<Disk>,
}

struct MockVm {
    vm: Vm,
    disks: Vec<Disk>,
    snapshots: Vec<MockSnapshot>,
    polls_until_down: u32,
    exporting_to: Option<String>,
}

struct MockState {
    connection_ok: bool,
    clusters: Vec<String>,
    domains: HashMap<String, StorageDomain>,
    vms: HashMap<String, MockVm>,
    export_entries: HashMap<String, Vec<Vm>>,
    snapshot_ready_after: u32,
    snapshot_gone_after: u32,
    clone_down_after: u32,
    export_down_after: u32,
    fail_create_snapshot: bool,
    fail_clone: bool,
    fail_export: bool,
    closed: bool,
    calls: Vec<String>,
}

pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    /// Countdown value that never completes.
    pub const STUCK: u32 = u32::MAX;

    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                connection_ok: true,
                clusters: Vec::new(),
                domains: HashMap::new(),
                vms: HashMap::new(),
                export_entries: HashMap::new(),
                snapshot_ready_after: 1,
                snapshot_gone_after: 0,
                clone_down_after: 1,
                export_down_after: 1,
                fail_create_snapshot: false,
                fail_clone: false,
                fail_export: false,
                closed: false,
                calls: Vec::new(),
            }),
        }
    }

    pub fn add_cluster(&self, name: &str) {
        self.state.lock().unwrap().clusters.push(name.to_string());
    }

    pub fn add_domain(&self, name: &str, used: u64, available: u64, warning_percent: u64) {
        let mut state = self.state.lock().unwrap();
        state.domains.insert(
            name.to_string(),
            StorageDomain {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                used,
                available,
                warning_low_space_percent: warning_percent,
            },
        );
        state.export_entries.entry(name.to_string()).or_default();
    }

    pub fn add_vm(&self, name: &str, disk_sizes: &[u64]) -> Vm {
        let vm = Vm {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: VmStatus::Up,
        };
        let disks = disk_sizes
            .iter()
            .map(|size| Disk {
                id: Uuid::new_v4().to_string(),
                actual_size: *size,
            })
            .collect();
        self.state.lock().unwrap().vms.insert(
            vm.id.clone(),
            MockVm {
                vm: vm.clone(),
                disks,
                snapshots: Vec::new(),
                polls_until_down: 0,
                exporting_to: None,
            },
        );
        vm
    }

    /// Plant a pre-existing tagged snapshot, as a crashed earlier run would
    /// leave behind.
    pub fn add_tagged_snapshot(&self, vm_id: &str, disk_sizes: &[u64]) -> Snapshot {
        let snap = Snapshot {
            id: Uuid::new_v4().to_string(),
            description: SNAPSHOT_DESCRIPTION.to_string(),
            status: SnapshotStatus::Ok,
            persist_memorystate: false,
        };
        let disks = disk_sizes
            .iter()
            .map(|size| Disk {
                id: Uuid::new_v4().to_string(),
                actual_size: *size,
            })
            .collect();
        let mut state = self.state.lock().unwrap();
        let entry = state.vms.get_mut(vm_id).expect("unknown vm");
        entry.snapshots.push(MockSnapshot {
            snap: snap.clone(),
            polls_until_ok: 0,
            polls_until_gone: None,
            disks,
        });
        snap
    }

    pub fn add_export_entry(&self, domain: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .export_entries
            .entry(domain.to_string())
            .or_default()
            .push(Vm {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                status: VmStatus::Down,
            });
    }

    pub fn set_connection_ok(&self, ok: bool) {
        self.state.lock().unwrap().connection_ok = ok;
    }

    /// Status fetches before a fresh snapshot reports `Ok`.
    pub fn set_snapshot_ready_after(&self, polls: u32) {
        self.state.lock().unwrap().snapshot_ready_after = polls;
    }

    /// Status fetches a deleted snapshot stays visible for; 0 means the
    /// deletion is reflected immediately.
    pub fn set_snapshot_gone_after(&self, polls: u32) {
        self.state.lock().unwrap().snapshot_gone_after = polls;
    }

    /// Status fetches before a clone reports `Down`.
    pub fn set_clone_down_after(&self, polls: u32) {
        self.state.lock().unwrap().clone_down_after = polls;
    }

    /// Status fetches before an exporting clone reports `Down`.
    pub fn set_export_down_after(&self, polls: u32) {
        self.state.lock().unwrap().export_down_after = polls;
    }

    pub fn set_fail_create_snapshot(&self, fail: bool) {
        self.state.lock().unwrap().fail_create_snapshot = fail;
    }

    pub fn set_fail_clone(&self, fail: bool) {
        self.state.lock().unwrap().fail_clone = fail;
    }

    pub fn set_fail_export(&self, fail: bool) {
        self.state.lock().unwrap().fail_export = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn export_entry_names(&self, domain: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .export_entries
            .get(domain)
            .map(|entries| entries.iter().map(|vm| vm.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn snapshots_of(&self, vm_id: &str) -> Vec<Snapshot> {
        self.state
            .lock()
            .unwrap()
            .vms
            .get(vm_id)
            .map(|entry| entry.snapshots.iter().map(|s| s.snap.clone()).collect())
            .unwrap_or_default()
    }

    pub fn vm_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .vms
            .values()
            .map(|entry| entry.vm.name.clone())
            .collect()
    }

    pub fn was_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn record(state: &mut MockState, call: String) {
        state.calls.push(call);
    }
}

#[async_trait]
impl PlatformGateway for MockPlatform {
    async fn test_connection(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().connection_ok)
    }

    async fn cluster_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().clusters.iter().any(|c| c == name))
    }

    async fn storage_domain_by_name(&self, name: &str) -> Result<Option<StorageDomain>> {
        Ok(self.state.lock().unwrap().domains.get(name).cloned())
    }

    async fn vm_by_name(&self, name: &str) -> Result<Option<Vm>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .vms
            .values()
            .find(|entry| entry.vm.name == name)
            .map(|entry| entry.vm.clone()))
    }

    async fn vm_status(&self, vm_id: &str) -> Result<VmStatus> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let entry = state
            .vms
            .get_mut(vm_id)
            .ok_or_else(|| BackupError::Platform(format!("vm {} not found", vm_id)))?;

        if entry.vm.status != VmStatus::Down {
            if entry.polls_until_down == Self::STUCK {
                return Ok(entry.vm.status);
            }
            if entry.polls_until_down > 0 {
                entry.polls_until_down -= 1;
                return Ok(entry.vm.status);
            }
            entry.vm.status = VmStatus::Down;
            if let Some(domain) = entry.exporting_to.take() {
                let backup = Vm {
                    id: Uuid::new_v4().to_string(),
                    name: entry.vm.name.clone(),
                    status: VmStatus::Down,
                };
                state
                    .export_entries
                    .entry(domain)
                    .or_default()
                    .push(backup);
            }
        }
        Ok(VmStatus::Down)
    }

    async fn attached_disks(&self, vm_id: &str) -> Result<Vec<Disk>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .vms
            .get(vm_id)
            .map(|entry| entry.disks.clone())
            .unwrap_or_default())
    }

    async fn snapshots(&self, vm_id: &str) -> Result<Vec<Snapshot>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .vms
            .get(vm_id)
            .map(|entry| entry.snapshots.iter().map(|s| s.snap.clone()).collect())
            .unwrap_or_default())
    }

    async fn snapshot(&self, vm_id: &str, snapshot_id: &str) -> Result<Option<Snapshot>> {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.vms.get_mut(vm_id) else {
            return Ok(None);
        };
        let Some(index) = entry
            .snapshots
            .iter()
            .position(|s| s.snap.id == snapshot_id)
        else {
            return Ok(None);
        };

        if let Some(remaining) = entry.snapshots[index].polls_until_gone {
            if remaining == Self::STUCK {
                return Ok(Some(entry.snapshots[index].snap.clone()));
            }
            if remaining == 0 {
                entry.snapshots.remove(index);
                return Ok(None);
            }
            entry.snapshots[index].polls_until_gone = Some(remaining - 1);
            return Ok(Some(entry.snapshots[index].snap.clone()));
        }

        let snap = &mut entry.snapshots[index];
        if snap.snap.status != SnapshotStatus::Ok {
            if snap.polls_until_ok == Self::STUCK {
                return Ok(Some(snap.snap.clone()));
            }
            if snap.polls_until_ok > 0 {
                snap.polls_until_ok -= 1;
                return Ok(Some(snap.snap.clone()));
            }
            snap.snap.status = SnapshotStatus::Ok;
        }
        Ok(Some(snap.snap.clone()))
    }

    async fn snapshot_disks(&self, vm_id: &str, snapshot_id: &str) -> Result<Vec<Disk>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .vms
            .get(vm_id)
            .and_then(|entry| {
                entry
                    .snapshots
                    .iter()
                    .find(|s| s.snap.id == snapshot_id)
                    .map(|s| s.disks.clone())
            })
            .unwrap_or_default())
    }

    async fn create_snapshot(
        &self,
        vm_id: &str,
        description: &str,
        persist_memorystate: bool,
    ) -> Result<Snapshot> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create_snapshot {
            return Err(BackupError::Platform(
                "snapshot creation rejected".to_string(),
            ));
        }
        let polls = state.snapshot_ready_after;
        let snap = Snapshot {
            id: Uuid::new_v4().to_string(),
            description: description.to_string(),
            status: SnapshotStatus::Locked,
            persist_memorystate,
        };
        Self::record(&mut state, format!("create_snapshot:{}", vm_id));
        let entry = state
            .vms
            .get_mut(vm_id)
            .ok_or_else(|| BackupError::Platform(format!("vm {} not found", vm_id)))?;
        entry.snapshots.push(MockSnapshot {
            snap: snap.clone(),
            polls_until_ok: polls,
            polls_until_gone: None,
            disks: Vec::new(),
        });
        Ok(snap)
    }

    async fn delete_snapshot(&self, vm_id: &str, snapshot_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let delay = state.snapshot_gone_after;
        Self::record(&mut state, format!("delete_snapshot:{}", snapshot_id));
        if let Some(entry) = state.vms.get_mut(vm_id) {
            if delay == 0 {
                entry.snapshots.retain(|s| s.snap.id != snapshot_id);
            } else if let Some(snap) = entry
                .snapshots
                .iter_mut()
                .find(|s| s.snap.id == snapshot_id)
            {
                snap.polls_until_gone = Some(delay);
            }
        }
        Ok(())
    }

    async fn clone_vm_from_snapshot(
        &self,
        vm_id: &str,
        snapshot_id: &str,
        clone_name: &str,
        _cluster: &str,
    ) -> Result<Vm> {
        let mut state = self.state.lock().unwrap();
        if state.fail_clone {
            return Err(BackupError::Platform("clone rejected".to_string()));
        }
        let polls = state.clone_down_after;
        let source = state
            .vms
            .get(vm_id)
            .ok_or_else(|| BackupError::Platform(format!("vm {} not found", vm_id)))?;
        if !source.snapshots.iter().any(|s| s.snap.id == snapshot_id) {
            return Err(BackupError::Platform(format!(
                "snapshot {} not found",
                snapshot_id
            )));
        }
        let disks = source.disks.clone();
        let clone = Vm {
            id: Uuid::new_v4().to_string(),
            name: clone_name.to_string(),
            status: VmStatus::ImageLocked,
        };
        Self::record(&mut state, format!("clone:{}", clone_name));
        state.vms.insert(
            clone.id.clone(),
            MockVm {
                vm: clone.clone(),
                disks,
                snapshots: Vec::new(),
                polls_until_down: polls,
                exporting_to: None,
            },
        );
        Ok(clone)
    }

    async fn export_vm(&self, vm_id: &str, request: &ExportRequest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_export {
            return Err(BackupError::Platform("export rejected".to_string()));
        }
        let polls = state.export_down_after;
        let entry = state
            .vms
            .get_mut(vm_id)
            .ok_or_else(|| BackupError::Platform(format!("vm {} not found", vm_id)))?;
        entry.vm.status = VmStatus::ImageLocked;
        entry.polls_until_down = polls;
        entry.exporting_to = Some(request.storage_domain.clone());
        let name = entry.vm.name.clone();
        Self::record(&mut state, format!("export:{}", name));
        Ok(())
    }

    async fn delete_vm(&self, vm_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = state
            .vms
            .get(vm_id)
            .map(|entry| entry.vm.name.clone())
            .unwrap_or_else(|| vm_id.to_string());
        Self::record(&mut state, format!("delete_vm:{}", name));
        state.vms.remove(vm_id);
        Ok(())
    }

    async fn export_entries(&self, export_domain: &str) -> Result<Vec<Vm>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .export_entries
            .get(export_domain)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_export_entry(&self, export_domain: &str, vm_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, format!("delete_export_entry:{}", vm_id));
        if let Some(entries) = state.export_entries.get_mut(export_domain) {
            entries.retain(|vm| vm.id != vm_id);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}
