use crate::clock::Clock;
use crate::config::RunConfig;
use crate::core::{Result, Vm, VmStatus};
use crate::notify::NotificationSink;
use crate::platform::{ExportRequest, PlatformGateway};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const POLL_TICK: u64 = POLL_INTERVAL.as_secs();
const PRE_EXPORT_SETTLE: Duration = Duration::from_secs(4);

/// Copies a cloned VM onto the export domain and polls the operation to
/// completion.
pub struct ExportOrchestrator {
    platform: Arc<dyn PlatformGateway>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSink>,
    export_domain: String,
    max_operation_time: u64,
}

impl ExportOrchestrator {
    pub fn new(
        platform: Arc<dyn PlatformGateway>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        run: &RunConfig,
    ) -> Self {
        Self {
            platform,
            clock,
            notifier,
            export_domain: run.cluster.export_domain.clone(),
            max_operation_time: run.vms.max_operation_time,
        }
    }

    /// Export the clone exclusively, discarding snapshot chains, and wait
    /// until it reports `down` again. Success means the backup now exists
    /// as an entity on the export domain.
    pub async fn export(&self, cloned_vm: &Vm) -> Result<bool> {
        self.clock.sleep(PRE_EXPORT_SETTLE).await;
        info!("[{}] Export the VM clone...", cloned_vm.name);

        let request = ExportRequest::to_domain(&self.export_domain);
        if let Err(err) = self.platform.export_vm(&cloned_vm.id, &request).await {
            error!("[{}] {}", cloned_vm.name, err);
            self.notifier.notify(&err.to_string()).await;
            return Ok(false);
        }

        let mut exported = false;
        let mut counter: u64 = 0;
        loop {
            self.clock.sleep(POLL_INTERVAL).await;
            if counter >= self.max_operation_time {
                break;
            }
            if self.platform.vm_status(&cloned_vm.id).await? == VmStatus::Down {
                exported = true;
                break;
            }
            counter += POLL_TICK;
        }

        if exported {
            info!("[{}] VM export done!", cloned_vm.name);
        } else {
            error!("[{}] VM export failed!", cloned_vm.name);
            self.notifier
                .notify(&format!("VM export failed for '{}'", cloned_vm.name))
                .await;
        }
        Ok(exported)
    }
}
