//! Pre-flight validation tests
//!
//! Connectivity and cluster/domain existence are fatal; a missing VM only
//! produces a notification and the run still proceeds.
//! Run with: cargo test --test preflight_tests
#![cfg(feature = "mock")]

use chrono::NaiveDate;
use std::sync::Arc;
use vmbackup::config::{ClusterSettings, RunConfig, VmSettings};
use vmbackup::platform::PlatformGateway;
use vmbackup::{BackupError, BackupOrchestrator, ManualClock, MockPlatform, RecordingNotifier};

fn run_config(names: &[&str]) -> RunConfig {
    RunConfig {
        vms: VmSettings {
            names: names.iter().map(|n| n.to_string()).collect(),
            middle_tag: "BKP".to_string(),
            persist_memorystate: false,
            max_operation_time: 600,
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
    platform: &Arc<MockPlatform>,
    notifier: &Arc<RecordingNotifier>,
    names: &[&str],
) -> BackupOrchestrator {
    let now = NaiveDate::from_ymd_opt(2020, 2, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    BackupOrchestrator::new(
        platform.clone(),
        Arc::new(ManualClock::starting_at(now)),
        notifier.clone(),
        run_config(names),
    )
}

fn complete_platform() -> Arc<MockPlatform> {
    let platform = Arc::new(MockPlatform::new());
    platform.add_cluster("Default");
    platform.add_domain("data", 0, 1024, 0);
    platform.add_domain("backup", 0, 1024, 0);
    platform.add_vm("vm1", &[]);
    platform
}

#[tokio::test]
async fn passes_with_complete_configuration() {
    let platform = complete_platform();
    let notifier = Arc::new(RecordingNotifier::new());

    orchestrator(&platform, &notifier, &["vm1"])
        .check_config_integrity()
        .await
        .unwrap();

    assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn failed_connection_test_is_fatal() {
    let platform = complete_platform();
    platform.set_connection_ok(false);
    let notifier = Arc::new(RecordingNotifier::new());

    let err = orchestrator(&platform, &notifier, &["vm1"])
        .check_config_integrity()
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::Connection(_)));
}

#[tokio::test]
async fn missing_cluster_is_fatal() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_domain("data", 0, 1024, 0);
    platform.add_domain("backup", 0, 1024, 0);
    let notifier = Arc::new(RecordingNotifier::new());

    let err = orchestrator(&platform, &notifier, &["vm1"])
        .check_config_integrity()
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::ClusterNotFound(name) if name == "Default"));
}

#[tokio::test]
async fn missing_storage_domain_is_fatal() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_cluster("Default");
    platform.add_domain("backup", 0, 1024, 0);
    let notifier = Arc::new(RecordingNotifier::new());

    let err = orchestrator(&platform, &notifier, &["vm1"])
        .check_config_integrity()
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::StorageDomainNotFound(name) if name == "data"));
}

#[tokio::test]
async fn missing_export_domain_is_fatal() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_cluster("Default");
    platform.add_domain("data", 0, 1024, 0);
    let notifier = Arc::new(RecordingNotifier::new());

    let err = orchestrator(&platform, &notifier, &["vm1"])
        .check_config_integrity()
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::StorageDomainNotFound(name) if name == "backup"));
}

#[tokio::test]
async fn unknown_vm_is_reported_but_not_fatal() {
    let platform = complete_platform();
    let notifier = Arc::new(RecordingNotifier::new());

    orchestrator(&platform, &notifier, &["vm1", "ghost"])
        .check_config_integrity()
        .await
        .unwrap();

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("ghost"));
}

#[tokio::test]
async fn session_close_is_observed() {
    let platform = complete_platform();
    platform.close().await.unwrap();
    assert!(platform.was_closed());
}
