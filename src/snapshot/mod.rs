use crate::clock::Clock;
use crate::config::VmSettings;
use crate::core::{Result, Snapshot, SnapshotStatus, Vm, SNAPSHOT_DESCRIPTION};
use crate::notify::NotificationSink;
use crate::platform::PlatformGateway;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const POLL_TICK: u64 = POLL_INTERVAL.as_secs();

/// The snapshot subsystem needs quiescence time before accepting a new
/// request right after a deletion.
const CREATE_SETTLE: Duration = Duration::from_secs(120);

/// Owns the lifecycle of the tool's tagged snapshot on a VM: find, create,
/// poll to a terminal state, delete.
///
/// Only snapshots carrying [`SNAPSHOT_DESCRIPTION`] are ever touched.
#[derive(Clone)]
pub struct SnapshotManager {
    platform: Arc<dyn PlatformGateway>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSink>,
    max_operation_time: u64,
    persist_memorystate: bool,
}

impl SnapshotManager {
    pub fn new(
        platform: Arc<dyn PlatformGateway>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        vms: &VmSettings,
    ) -> Self {
        Self {
            platform,
            clock,
            notifier,
            max_operation_time: vms.max_operation_time,
            persist_memorystate: vms.persist_memorystate,
        }
    }

    async fn find_tagged(&self, vm: &Vm) -> Result<Option<Snapshot>> {
        Ok(self
            .platform
            .snapshots(&vm.id)
            .await?
            .into_iter()
            .find(|snap| snap.description == SNAPSHOT_DESCRIPTION))
    }

    /// Locate the tagged snapshot (or take the given one) and, in waiting
    /// mode, poll it to `Ok`.
    ///
    /// Waiting polls every 2 s, re-fetching on each tick. A snapshot that
    /// disappears mid-poll is "gone", not an error: the result is `None`.
    /// When the tick count reaches `max_operation_time` the wait is
    /// abandoned with one failure notification. In non-waiting mode the
    /// result is always `None`; callers use it to fire a settling check
    /// without blocking on it.
    pub async fn find_or_wait(
        &self,
        vm: &Vm,
        existing: Option<Snapshot>,
        wait: bool,
    ) -> Result<Option<Snapshot>> {
        let snap = match existing {
            Some(snap) => Some(snap),
            None => self.find_tagged(vm).await?,
        };
        let Some(mut snap) = snap else {
            return Ok(None);
        };
        if !wait {
            return Ok(None);
        }

        let mut counter: u64 = 0;
        while snap.status != SnapshotStatus::Ok {
            if counter >= self.max_operation_time {
                error!(
                    "[{}] Something went wrong with the snapshot! Process canceled",
                    vm.name
                );
                self.notifier
                    .notify(&format!("VM backup failed with snapshot issues on '{}'", vm.name))
                    .await;
                return Ok(None);
            }

            self.clock.sleep(POLL_INTERVAL).await;
            counter += POLL_TICK;

            match self.platform.snapshot(&vm.id, &snap.id).await? {
                Some(current) => snap = current,
                // deleted while we were waiting
                None => return Ok(None),
            }
        }

        Ok(Some(snap))
    }

    /// Delete any tagged snapshot left over from an earlier run and wait for
    /// the deletion to settle. A new snapshot is never created while an old
    /// tagged one is outstanding.
    pub async fn reclaim_existing(&self, vm: &Vm) -> Result<()> {
        if let Some(snap) = self.find_or_wait(vm, None, true).await? {
            info!("[{}] Old snapshot found, wait for deleting it...", vm.name);
            self.delete(vm, &snap, true).await?;
        }
        Ok(())
    }

    /// Create the tagged snapshot and poll it to `Ok`.
    ///
    /// A platform-rejected create or a wait that does not settle yields
    /// `None`; the run continues with the next VM.
    pub async fn create(&self, vm: &Vm) -> Result<Option<Snapshot>> {
        info!("[{}] Create snapshot...", vm.name);

        self.reclaim_existing(vm).await?;
        self.clock.sleep(CREATE_SETTLE).await;

        let snap = match self
            .platform
            .create_snapshot(&vm.id, SNAPSHOT_DESCRIPTION, self.persist_memorystate)
            .await
        {
            Ok(snap) => snap,
            Err(err) => {
                error!("[{}] {}", vm.name, err);
                self.notifier.notify(&err.to_string()).await;
                return Ok(None);
            }
        };

        match self.find_or_wait(vm, Some(snap), true).await? {
            Some(snap) => {
                info!("[{}] Creating snapshot done!", vm.name);
                Ok(Some(snap))
            }
            None => {
                error!("[{}] Creating snapshot failed!", vm.name);
                Ok(None)
            }
        }
    }

    /// Issue deletion; with `wait` the call blocks until the platform stops
    /// reporting the snapshot, i.e. the deletion is confirmed, not merely
    /// requested. Without it the deletion is fire-and-forget, used once a
    /// clone exists and the snapshot is only dead weight.
    pub async fn delete(&self, vm: &Vm, snap: &Snapshot, wait: bool) -> Result<()> {
        info!(
            "[{}] Removing the snapshot: '{}'...",
            vm.name, snap.description
        );
        self.platform.delete_snapshot(&vm.id, &snap.id).await?;

        if wait {
            let mut counter: u64 = 0;
            while self.platform.snapshot(&vm.id, &snap.id).await?.is_some() {
                if counter >= self.max_operation_time {
                    error!("[{}] Snapshot deletion did not settle!", vm.name);
                    self.notifier
                        .notify(&format!(
                            "Snapshot deletion did not settle on '{}'",
                            vm.name
                        ))
                        .await;
                    return Ok(());
                }
                self.clock.sleep(POLL_INTERVAL).await;
                counter += POLL_TICK;
            }
        }

        info!("[{}] Snapshot removing done!", vm.name);
        Ok(())
    }
}
