use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Ownership marker written into every snapshot this tool creates.
///
/// A snapshot carrying this description is "ours" and may be reclaimed or
/// deleted; user-created snapshots are never touched.
pub const SNAPSHOT_DESCRIPTION: &str = "snapshot for backup";

/// A virtual machine entity as seen through the platform gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub id: String,
    pub name: String,
    pub status: VmStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    /// Powered off; for a clone this means the disk data is fully materialized.
    Down,
    Up,
    /// Disk images are being written (clone or export in flight).
    ImageLocked,
    Unknown,
}

impl VmStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "down" => Self::Down,
            "up" => Self::Up,
            "image_locked" => Self::ImageLocked,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub description: String,
    pub status: SnapshotStatus,
    pub persist_memorystate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// Still being created or deleted.
    Locked,
    InProgress,
    Ok,
}

impl SnapshotStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "ok" => Self::Ok,
            "in_progress" => Self::InProgress,
            _ => Self::Locked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub id: String,
    /// Actually allocated size in bytes, not the provisioned size.
    pub actual_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDomain {
    pub id: String,
    pub name: String,
    pub used: u64,
    pub available: u64,
    /// Platform-reported headroom percentage, overridable from config.
    pub warning_low_space_percent: u64,
}

/// Codec for backup entity names: `{vm_name}_{middle_tag}_{YYYYMMDD}_{HHMMSS}`.
///
/// The name suffix is the only durable record of a backup's age and ownership,
/// so the exporter (writer) and the retention sweeper (reader) must agree on
/// it exactly. Both go through this type.
pub struct BackupName;

impl BackupName {
    pub const STAMP_FORMAT: &'static str = "%Y%m%d_%H%M%S";

    /// Length of the trailing `YYYYMMDD_HHMMSS` stamp.
    pub const STAMP_LEN: usize = 15;

    /// Build the name for a new backup entity.
    pub fn compose(vm_name: &str, middle_tag: &str, at: NaiveDateTime) -> String {
        format!("{}_{}_{}", vm_name, middle_tag, at.format(Self::STAMP_FORMAT))
    }

    /// Whether an export-domain entity name belongs to the given VM's backups.
    pub fn matches(name: &str, vm_name: &str, middle_tag: &str) -> bool {
        name.contains(&format!("{}_{}", vm_name, middle_tag))
    }

    /// Parse the date out of the trailing stamp of a backup entity name.
    ///
    /// Returns `None` unless the last 15 characters are exactly 8 digits, an
    /// underscore and 6 digits, with the digit halves forming a valid
    /// calendar date. Anything that fails this check is treated as a foreign
    /// or malformed entry and must never be deleted.
    pub fn stamp_date(name: &str) -> Option<NaiveDate> {
        if name.len() < Self::STAMP_LEN {
            return None;
        }
        let start = name.len() - Self::STAMP_LEN;
        if !name.is_char_boundary(start) {
            return None;
        }

        let (date_part, rest) = name[start..].split_at(8);
        let time_part = rest.strip_prefix('_')?;

        if !date_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if !time_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        NaiveDate::parse_from_str(date_part, "%Y%m%d").ok()
    }
}

/// Human readable byte size, e.g. `1.50GB`.
pub fn human_size(num: i64) -> String {
    let mut size = num as f64;
    for unit in ["bytes", "KB", "MB", "GB", "TB", "PB", "EB", "ZB"] {
        if size.abs() < 1024.0 {
            return format!("{:.2}{}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2}YB", size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn compose_and_parse_round_trip() {
        let name = BackupName::compose("vm1", "BKP", at(2020, 1, 1, 12, 0, 0));
        assert_eq!(name, "vm1_BKP_20200101_120000");

        let date = BackupName::stamp_date(&name).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
    }

    #[test]
    fn stamp_rejects_malformed_suffix() {
        assert!(BackupName::stamp_date("vm1_BKP_20200101_badtime").is_none());
        assert!(BackupName::stamp_date("vm1_BKP_2020x101_120000").is_none());
        assert!(BackupName::stamp_date("vm1_BKP_20200101-120000").is_none());
        assert!(BackupName::stamp_date("short").is_none());
    }

    #[test]
    fn stamp_rejects_impossible_date() {
        // digits in the right place, but not a calendar date
        assert!(BackupName::stamp_date("vm1_BKP_20201341_120000").is_none());
    }

    #[test]
    fn matches_is_scoped_to_vm_and_tag() {
        assert!(BackupName::matches("vm1_BKP_20200101_120000", "vm1", "BKP"));
        assert!(!BackupName::matches("othervm_BKP_20200101_120000", "vm1", "BKP"));
        assert!(!BackupName::matches("vm1_OTHER_20200101_120000", "vm1", "BKP"));
    }

    #[test]
    fn human_size_scales_units() {
        assert_eq!(human_size(512), "512.00bytes");
        assert_eq!(human_size(2048), "2.00KB");
        assert_eq!(human_size(10 * 1024 * 1024 * 1024), "10.00GB");
        assert_eq!(human_size(-2048), "-2.00KB");
    }
}
