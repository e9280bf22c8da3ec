use crate::clock::Clock;
use crate::config::RunConfig;
use crate::core::{BackupName, Result, Vm};
use crate::platform::PlatformGateway;
use std::sync::Arc;
use tracing::info;

/// Retires backups on the export domain that fell out of the retention
/// window.
///
/// Deletion is gated on the backup-name convention: an entry whose name does
/// not parse cleanly is assumed foreign or damaged and is never touched.
pub struct RetentionSweeper {
    platform: Arc<dyn PlatformGateway>,
    clock: Arc<dyn Clock>,
    export_domain: String,
    middle_tag: String,
    hold_days: i64,
}

impl RetentionSweeper {
    pub fn new(
        platform: Arc<dyn PlatformGateway>,
        clock: Arc<dyn Clock>,
        run: &RunConfig,
    ) -> Self {
        Self {
            platform,
            clock,
            export_domain: run.cluster.export_domain.clone(),
            middle_tag: run.vms.middle_tag.clone(),
            hold_days: run.vms.hold_backups,
        }
    }

    /// Delete every backup of this VM strictly older than the window.
    pub async fn sweep(&self, vm: &Vm) -> Result<()> {
        let expired = (self.clock.now() - chrono::Duration::days(self.hold_days)).date();

        for entry in self.platform.export_entries(&self.export_domain).await? {
            if !BackupName::matches(&entry.name, &vm.name, &self.middle_tag) {
                continue;
            }
            match BackupName::stamp_date(&entry.name) {
                Some(date) if date < expired => {
                    info!("Delete old backup: {}", entry.name);
                    self.platform
                        .delete_export_entry(&self.export_domain, &entry.id)
                        .await?;
                }
                // fresh, malformed or foreign: leave untouched
                _ => {}
            }
        }
        Ok(())
    }
}
