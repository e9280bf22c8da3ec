use crate::clock::Clock;
use crate::clone::CloneOrchestrator;
use crate::config::RunConfig;
use crate::core::{BackupError, Result, Vm};
use crate::export::ExportOrchestrator;
use crate::notify::NotificationSink;
use crate::platform::PlatformGateway;
use crate::retention::RetentionSweeper;
use crate::snapshot::SnapshotManager;
use crate::space::SpaceGuard;
use std::sync::Arc;
use tracing::{error, info};

/// Top-level sequencing: drives every configured VM through
/// retire-old-backups, the space gate, snapshot, clone, export and cleanup.
///
/// Failures are contained per VM: any stage falling over aborts only the
/// remaining stages of that VM, the loop always moves on to the next one.
pub struct BackupOrchestrator {
    platform: Arc<dyn PlatformGateway>,
    notifier: Arc<dyn NotificationSink>,
    run: RunConfig,
    space: SpaceGuard,
    retention: RetentionSweeper,
    snapshots: SnapshotManager,
    cloner: CloneOrchestrator,
    exporter: ExportOrchestrator,
}

impl BackupOrchestrator {
    pub fn new(
        platform: Arc<dyn PlatformGateway>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        run: RunConfig,
    ) -> Self {
        let space = SpaceGuard::new(platform.clone(), &run.cluster);
        let retention = RetentionSweeper::new(platform.clone(), clock.clone(), &run);
        let snapshots =
            SnapshotManager::new(platform.clone(), clock.clone(), notifier.clone(), &run.vms);
        let cloner = CloneOrchestrator::new(
            platform.clone(),
            clock.clone(),
            notifier.clone(),
            snapshots.clone(),
            &run,
        );
        let exporter = ExportOrchestrator::new(platform.clone(), clock, notifier.clone(), &run);

        Self {
            platform,
            notifier,
            run,
            space,
            retention,
            snapshots,
            cloner,
            exporter,
        }
    }

    /// Pre-flight validation.
    ///
    /// Connectivity, cluster and storage-domain existence are fatal; a
    /// configured VM that is missing on the platform is only reported, the
    /// remaining names are still validated and the run proceeds.
    pub async fn check_config_integrity(&self) -> Result<()> {
        if !self.platform.test_connection().await? {
            return Err(BackupError::Connection(
                "engine connection test failed".to_string(),
            ));
        }

        let cluster = &self.run.cluster;
        if !self.platform.cluster_exists(&cluster.cluster_name).await? {
            return Err(BackupError::ClusterNotFound(cluster.cluster_name.clone()));
        }
        if self
            .platform
            .storage_domain_by_name(&cluster.storage_domain)
            .await?
            .is_none()
        {
            return Err(BackupError::StorageDomainNotFound(
                cluster.storage_domain.clone(),
            ));
        }
        if self
            .platform
            .storage_domain_by_name(&cluster.export_domain)
            .await?
            .is_none()
        {
            return Err(BackupError::StorageDomainNotFound(
                cluster.export_domain.clone(),
            ));
        }

        for name in &self.run.vms.names {
            if self.platform.vm_by_name(name).await?.is_none() {
                error!("The VM '{}' doesn't exist on your cluster!", name);
                self.notifier
                    .notify(&format!("The VM '{}' doesn't exist on your cluster!", name))
                    .await;
            }
        }

        Ok(())
    }

    /// Run the backup pipeline over the configured VM list.
    ///
    /// Always completes; per-VM faults are logged, notified and contained.
    pub async fn run(&self) -> Result<()> {
        info!("Start backup process...");

        for vm_name in &self.run.vms.names {
            if let Err(err) = self.backup_vm(vm_name).await {
                error!("[{}] Backup aborted: {}", vm_name, err);
                self.notifier
                    .notify(&format!("Backup of '{}' aborted: {}", vm_name, err))
                    .await;
            }
        }

        info!("Backup process done...");
        Ok(())
    }

    async fn backup_vm(&self, vm_name: &str) -> Result<()> {
        // a VM that vanished since pre-flight is skipped without side effects
        let Some(vm) = self.platform.vm_by_name(vm_name).await? else {
            return Ok(());
        };

        self.retention.sweep(&vm).await?;

        if !self.space.may_backup(&vm).await? {
            error!("[{}] Not enough space for the backup!", vm.name);
            self.notifier
                .notify(&format!("Not enough space for backup VM '{}'!", vm.name))
                .await;
            return Ok(());
        }

        let Some(snap) = self.snapshots.create(&vm).await? else {
            return Ok(());
        };
        let Some(clone) = self.cloner.clone_vm(&vm, &snap).await? else {
            return Ok(());
        };

        // the snapshot is dead weight once the clone exists; release it
        // without holding up the export
        if let Err(err) = self.snapshots.delete(&vm, &snap, false).await {
            error!("[{}] Releasing the backup snapshot failed: {}", vm.name, err);
            self.notifier
                .notify(&format!(
                    "Releasing the backup snapshot of '{}' failed: {}",
                    vm.name, err
                ))
                .await;
        }

        if self.exporter.export(&clone).await? {
            if let Err(err) = self.delete_clone(&clone).await {
                error!("[{}] Deleting the cloned VM failed: {}", clone.name, err);
                self.notifier
                    .notify(&format!(
                        "Deleting the cloned VM '{}' failed: {}",
                        clone.name, err
                    ))
                    .await;
            }
        }

        Ok(())
    }

    async fn delete_clone(&self, clone: &Vm) -> Result<()> {
        info!("[{}] Delete cloned VM...", clone.name);
        self.platform.delete_vm(&clone.id).await
    }
}
