use crate::clock::Clock;
use crate::config::RunConfig;
use crate::core::{BackupName, Result, Snapshot, Vm, VmStatus};
use crate::notify::NotificationSink;
use crate::platform::PlatformGateway;
use crate::snapshot::SnapshotManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const POLL_TICK: u64 = POLL_INTERVAL.as_secs();

/// A snapshot reported `ok` can still be briefly non-clonable; give the
/// platform room before asking.
const CLONE_SETTLE: Duration = Duration::from_secs(120);
const POST_CLONE_SETTLE: Duration = Duration::from_secs(2);

/// Clones the tagged snapshot into a standalone VM and polls it down.
pub struct CloneOrchestrator {
    platform: Arc<dyn PlatformGateway>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSink>,
    snapshots: SnapshotManager,
    cluster_name: String,
    middle_tag: String,
    max_operation_time: u64,
}

impl CloneOrchestrator {
    pub fn new(
        platform: Arc<dyn PlatformGateway>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        snapshots: SnapshotManager,
        run: &RunConfig,
    ) -> Self {
        Self {
            platform,
            clock,
            notifier,
            snapshots,
            cluster_name: run.cluster.cluster_name.clone(),
            middle_tag: run.vms.middle_tag.clone(),
            max_operation_time: run.vms.max_operation_time,
        }
    }

    /// Clone `snap` into a new VM named by the backup convention and wait
    /// until the clone reports `down`, i.e. its disk data is fully
    /// materialized.
    ///
    /// Request failure and wait timeout both yield `None`; on timeout the
    /// partially created clone is left behind for manual cleanup.
    pub async fn clone_vm(&self, vm: &Vm, snap: &Snapshot) -> Result<Option<Vm>> {
        self.clock.sleep(CLONE_SETTLE).await;
        self.snapshots.find_or_wait(vm, Some(snap.clone()), true).await?;

        let clone_name = BackupName::compose(&vm.name, &self.middle_tag, self.clock.now());
        info!("[{}] Create VM clone from snapshot...", vm.name);

        let mut clone = match self
            .platform
            .clone_vm_from_snapshot(&vm.id, &snap.id, &clone_name, &self.cluster_name)
            .await
        {
            Ok(clone) => clone,
            Err(err) => {
                error!("[{}] {}", vm.name, err);
                self.notifier.notify(&err.to_string()).await;
                return Ok(None);
            }
        };

        let mut counter: u64 = 0;
        while clone.status != VmStatus::Down {
            if counter >= self.max_operation_time {
                error!("[{}] Creating VM clone from snapshot failed", vm.name);
                self.notifier
                    .notify(&format!(
                        "Creating VM clone from snapshot failed! No backup for '{}' at {}",
                        vm.name,
                        self.clock.now().format("%H:%M:%S")
                    ))
                    .await;
                return Ok(None);
            }

            self.clock.sleep(POLL_INTERVAL).await;
            clone.status = self.platform.vm_status(&clone.id).await?;
            counter += POLL_TICK;
        }

        info!("[{}] Creating VM clone from snapshot completed!", vm.name);
        self.clock.sleep(POST_CLONE_SETTLE).await;

        Ok(Some(clone))
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{ClusterSettings, VmSettings};
    use crate::notify::RecordingNotifier;
    use crate::platform::MockPlatform;
    use chrono::NaiveDate;

    fn run_config(max_operation_time: u64) -> RunConfig {
        RunConfig {
            vms: VmSettings {
                names: vec!["vm1".to_string()],
                middle_tag: "BKP".to_string(),
                persist_memorystate: false,
                max_operation_time,
                hold_backups: 30,
            },
            cluster: ClusterSettings {
                cluster_name: "Default".to_string(),
                storage_domain: "data".to_string(),
                export_domain: "backup".to_string(),
                low_space_indicator: 0,
            },
        }
    }

    fn orchestrator(
        platform: Arc<MockPlatform>,
        notifier: Arc<RecordingNotifier>,
        max_operation_time: u64,
    ) -> CloneOrchestrator {
        let now = NaiveDate::from_ymd_opt(2020, 2, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let clock: Arc<ManualClock> = Arc::new(ManualClock::starting_at(now));
        let run = run_config(max_operation_time);
        let snapshots = SnapshotManager::new(
            platform.clone(),
            clock.clone(),
            notifier.clone(),
            &run.vms,
        );
        CloneOrchestrator::new(platform, clock, notifier, snapshots, &run)
    }

    #[tokio::test]
    async fn clone_waits_until_down_and_names_by_convention() {
        let platform = Arc::new(MockPlatform::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let vm = platform.add_vm("vm1", &[]);
        let snap = platform.add_tagged_snapshot(&vm.id, &[]);
        platform.set_clone_down_after(3);

        let clone = orchestrator(platform.clone(), notifier.clone(), 600)
            .clone_vm(&vm, &snap)
            .await
            .unwrap()
            .expect("clone should complete");

        assert_eq!(clone.status, VmStatus::Down);
        assert!(clone.name.starts_with("vm1_BKP_"));
        assert!(BackupName::stamp_date(&clone.name).is_some());
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn request_failure_yields_none() {
        let platform = Arc::new(MockPlatform::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let vm = platform.add_vm("vm1", &[]);
        let snap = platform.add_tagged_snapshot(&vm.id, &[]);
        platform.set_fail_clone(true);

        let result = orchestrator(platform.clone(), notifier.clone(), 600)
            .clone_vm(&vm, &snap)
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn clone_times_out_when_vm_never_reaches_down() {
        // the tick counter must actually accumulate, otherwise this loop
        // would never terminate
        let platform = Arc::new(MockPlatform::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let vm = platform.add_vm("vm1", &[]);
        let snap = platform.add_tagged_snapshot(&vm.id, &[]);
        platform.set_clone_down_after(MockPlatform::STUCK);

        let result = orchestrator(platform.clone(), notifier.clone(), 30)
            .clone_vm(&vm, &snap)
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(notifier.messages().len(), 1);
    }
}
