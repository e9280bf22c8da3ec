use crate::config::ClusterSettings;
use crate::core::{human_size, BackupError, Result, Vm};
use crate::platform::PlatformGateway;
use std::sync::Arc;
use tracing::info;

/// Decides whether target storage has enough headroom for a backup.
pub struct SpaceGuard {
    platform: Arc<dyn PlatformGateway>,
    storage_domain: String,
    export_domain: String,
    low_space_indicator: i64,
}

impl SpaceGuard {
    pub fn new(platform: Arc<dyn PlatformGateway>, cluster: &ClusterSettings) -> Self {
        Self {
            platform,
            storage_domain: cluster.storage_domain.clone(),
            export_domain: cluster.export_domain.clone(),
            low_space_indicator: cluster.low_space_indicator,
        }
    }

    /// Usable free space on a domain in bytes.
    ///
    /// A percentage of the total capacity is reserved as headroom (the
    /// configured override when positive, otherwise the platform-reported
    /// indicator) and excluded from "free". The result can go negative when
    /// the reservation already exceeds what is available.
    pub async fn free_space(&self, domain: &str) -> Result<i64> {
        let sd = self
            .platform
            .storage_domain_by_name(domain)
            .await?
            .ok_or_else(|| BackupError::StorageDomainNotFound(domain.to_string()))?;

        let indicator = if self.low_space_indicator > 0 {
            self.low_space_indicator
        } else {
            sd.warning_low_space_percent as i64
        };

        let total = (sd.used + sd.available) as i64;
        let reserved = total * indicator / 100;
        let free = sd.available as i64 - reserved;

        info!(
            "Free space on domain: '{}' is: {}",
            domain,
            human_size(free)
        );
        Ok(free)
    }

    /// Total disk footprint of a VM: attached disks plus snapshot disks,
    /// actual sizes.
    pub async fn disks_size(&self, vm: &Vm) -> Result<u64> {
        let mut size: u64 = 0;

        for disk in self.platform.attached_disks(&vm.id).await? {
            size += disk.actual_size;
        }

        for snap in self.platform.snapshots(&vm.id).await? {
            for disk in self.platform.snapshot_disks(&vm.id, &snap.id).await? {
                size += disk.actual_size;
            }
        }

        info!("[{}] disks size is: {}", vm.name, human_size(size as i64));
        Ok(size)
    }

    /// A backup may proceed only when both inequalities are strict: equality
    /// counts as insufficient.
    pub async fn may_backup(&self, vm: &Vm) -> Result<bool> {
        let free_storage = self.free_space(&self.storage_domain).await?;
        let free_export = self.free_space(&self.export_domain).await?;
        let disks_size = self.disks_size(vm).await? as i64;

        Ok(free_storage > disks_size && disks_size < free_export)
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn cluster() -> ClusterSettings {
        ClusterSettings {
            cluster_name: "Default".to_string(),
            storage_domain: "data".to_string(),
            export_domain: "backup".to_string(),
            low_space_indicator: 0,
        }
    }

    fn guard_with(platform: Arc<MockPlatform>) -> SpaceGuard {
        SpaceGuard::new(platform, &cluster())
    }

    #[tokio::test]
    async fn free_space_reserves_indicator_percentage() {
        let platform = Arc::new(MockPlatform::new());
        // total 100GiB, 10% reserved => free = 60 - 10 = 50GiB
        platform.add_domain("data", 40 * GIB, 60 * GIB, 10);

        let guard = guard_with(platform);
        let free = guard.free_space("data").await.unwrap();
        assert_eq!(free, 50 * GIB as i64);
    }

    #[tokio::test]
    async fn configured_indicator_overrides_platform_default() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_domain("data", 40 * GIB, 60 * GIB, 10);

        let mut settings = cluster();
        settings.low_space_indicator = 50;
        let guard = SpaceGuard::new(platform, &settings);

        // 50% of 100GiB reserved => 60 - 50 = 10GiB
        let free = guard.free_space("data").await.unwrap();
        assert_eq!(free, 10 * GIB as i64);
    }

    #[tokio::test]
    async fn free_space_can_go_negative() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_domain("data", 95 * GIB, 5 * GIB, 10);

        let guard = guard_with(platform);
        let free = guard.free_space("data").await.unwrap();
        assert_eq!(free, -(5 * GIB as i64));
    }

    #[tokio::test]
    async fn equality_is_insufficient_on_either_side() {
        // free(data) = 20 - 10 = 10GiB, free(backup) = 60 - 10 = 50GiB
        let platform = Arc::new(MockPlatform::new());
        platform.add_domain("data", 80 * GIB, 20 * GIB, 10);
        platform.add_domain("backup", 40 * GIB, 60 * GIB, 10);
        let vm = platform.add_vm("vm1", &[10 * GIB]);

        let guard = guard_with(platform.clone());
        assert_eq!(guard.free_space("data").await.unwrap(), 10 * GIB as i64);
        // disks == free(data): not strictly smaller, refuse
        assert!(!guard.may_backup(&vm).await.unwrap());

        // free(backup) = 10GiB too: disks == free(export), refuse
        let platform = Arc::new(MockPlatform::new());
        platform.add_domain("data", 40 * GIB, 60 * GIB, 10);
        platform.add_domain("backup", 80 * GIB, 20 * GIB, 10);
        let vm = platform.add_vm("vm1", &[10 * GIB]);

        let guard = guard_with(platform);
        assert!(!guard.may_backup(&vm).await.unwrap());
    }

    #[tokio::test]
    async fn strict_inequalities_allow_backup() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_domain("data", 30 * GIB, 70 * GIB, 10);
        platform.add_domain("backup", 30 * GIB, 70 * GIB, 10);
        let vm = platform.add_vm("vm1", &[10 * GIB]);

        let guard = guard_with(platform);
        assert!(guard.may_backup(&vm).await.unwrap());
    }

    #[tokio::test]
    async fn disks_size_includes_snapshot_disks() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_domain("data", 0, 100 * GIB, 0);
        platform.add_domain("backup", 0, 100 * GIB, 0);
        let vm = platform.add_vm("vm1", &[4 * GIB, 2 * GIB]);
        platform.add_tagged_snapshot(&vm.id, &[GIB]);

        let guard = guard_with(platform);
        assert_eq!(guard.disks_size(&vm).await.unwrap(), 7 * GIB);
    }
}
