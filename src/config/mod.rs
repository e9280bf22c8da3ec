use crate::core::{BackupError, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

/// System-wide application config location.
pub const APP_CONFIG_SYSTEM_PATH: &str = "/etc/vmbackup/vmbackup.toml";
/// Fallback next to the working directory, mainly for development.
pub const APP_CONFIG_LOCAL_PATH: &str = "vmbackup.toml";

/// Application-level settings: engine endpoint, notification target, logging.
///
/// Loaded from a fixed path; the per-run settings live in [`RunConfig`],
/// selected on the command line.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiSettings,
    #[serde(default)]
    pub notify: NotifySettings,
    #[serde(default)]
    pub logging: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    pub url: String,
    pub user: String,
    pub password: String,
    /// PEM file with the engine CA; empty uses the system trust store.
    #[serde(default)]
    pub ca_file: String,
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifySettings {
    /// Empty URL disables notification delivery entirely.
    #[serde(default)]
    pub webhook_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_directory")]
    pub directory: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            level: default_log_level(),
        }
    }
}

fn default_application_name() -> String {
    "vmbackup".to_string()
}

fn default_log_directory() -> String {
    "/var/log/vmbackup".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load from the system path, falling back to the local one.
    pub fn load_default() -> Result<Self> {
        let path = if Path::new(APP_CONFIG_SYSTEM_PATH).exists() {
            APP_CONFIG_SYSTEM_PATH
        } else {
            APP_CONFIG_LOCAL_PATH
        };
        Self::load(Path::new(path))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            BackupError::Config(format!("File \"{}\" not readable: {}", path.display(), err))
        })?;
        toml::from_str(&raw).map_err(|err| BackupError::Config(err.to_string()))
    }
}

/// Per-run settings: the VM list and the cluster/storage layout to back up.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub vms: VmSettings,
    pub cluster: ClusterSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmSettings {
    /// VMs to back up, in order.
    pub names: Vec<String>,
    /// Middle tag of the backup name convention, e.g. `BKP`.
    pub middle_tag: String,
    /// Persist RAM state in the snapshot.
    #[serde(default)]
    pub persist_memorystate: bool,
    /// Upper bound in seconds for every polled platform operation.
    pub max_operation_time: u64,
    /// Retention window in days for backups on the export domain.
    pub hold_backups: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSettings {
    pub cluster_name: String,
    /// Domain holding the live VM disks.
    pub storage_domain: String,
    /// Domain receiving the exported backups.
    pub export_domain: String,
    /// Headroom percentage override; 0 or negative uses the
    /// platform-reported default.
    #[serde(default)]
    pub low_space_indicator: i64,
}

impl RunConfig {
    /// Load from a file path, or from stdin when the path is exactly `-`.
    pub fn load(path: &str) -> Result<Self> {
        let raw = if path == "-" {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        } else {
            std::fs::read_to_string(path).map_err(|err| {
                BackupError::Config(format!("File \"{}\" not readable: {}", path, err))
            })?
        };

        let config: RunConfig =
            toml::from_str(&raw).map_err(|err| BackupError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vms.names.is_empty() {
            return Err(BackupError::Config("vm list cannot be empty".to_string()));
        }
        if self.vms.middle_tag.is_empty() {
            return Err(BackupError::Config("middle_tag cannot be empty".to_string()));
        }
        if self.vms.max_operation_time == 0 {
            return Err(BackupError::Config(
                "max_operation_time must be > 0".to_string(),
            ));
        }
        if self.vms.hold_backups < 0 {
            return Err(BackupError::Config(
                "hold_backups cannot be negative".to_string(),
            ));
        }
        if self.cluster.cluster_name.is_empty() {
            return Err(BackupError::Config(
                "cluster_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RUN_TOML: &str = r#"
        [vms]
        names = ["vm1", "vm2"]
        middle_tag = "BKP"
        persist_memorystate = false
        max_operation_time = 600
        hold_backups = 30

        [cluster]
        cluster_name = "Default"
        storage_domain = "data"
        export_domain = "backup"
        low_space_indicator = 10
    "#;

    #[test]
    fn parses_run_config() {
        let config: RunConfig = toml::from_str(RUN_TOML).unwrap();
        assert_eq!(config.vms.names, vec!["vm1", "vm2"]);
        assert_eq!(config.vms.middle_tag, "BKP");
        assert_eq!(config.vms.max_operation_time, 600);
        assert_eq!(config.vms.hold_backups, 30);
        assert_eq!(config.cluster.export_domain, "backup");
        assert_eq!(config.cluster.low_space_indicator, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_run_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RUN_TOML.as_bytes()).unwrap();

        let config = RunConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.cluster.cluster_name, "Default");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = RunConfig::load("/nonexistent/run.toml").unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config: RunConfig = toml::from_str(RUN_TOML).unwrap();
        config.vms.names.clear();
        assert!(config.validate().is_err());

        let mut config: RunConfig = toml::from_str(RUN_TOML).unwrap();
        config.vms.middle_tag.clear();
        assert!(config.validate().is_err());

        let mut config: RunConfig = toml::from_str(RUN_TOML).unwrap();
        config.vms.max_operation_time = 0;
        assert!(config.validate().is_err());

        let mut config: RunConfig = toml::from_str(RUN_TOML).unwrap();
        config.vms.hold_backups = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn app_config_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [api]
            url = "https://engine/ovirt-engine/api"
            user = "admin@internal"
            password = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.api.application_name, "vmbackup");
        assert!(config.notify.webhook_url.is_empty());
        assert_eq!(config.logging.level, "info");
    }
}
