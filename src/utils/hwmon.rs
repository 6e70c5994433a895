use indexmap::IndexMap;
use std::fs::read_dir;
use std::path::Path;
use walkdir::WalkDir;

use crate::utils::file::{get_file_line, read_number_from_file};

pub const HWMON_ROOT: &str = "/sys/class/hwmon";

/// One `fanN_input` reading of a `hwmon` device.
#[derive(Debug, Clone, PartialEq)]
pub struct FanSensor {
    pub id: u32,
    pub name: String,
    pub label: String,
    pub rpm: u32,
}

impl FanSensor {
    /// `<hwmon name>/<label>`, falling back to `fanN` when unlabelled.
    pub fn display_name(&self) -> String {
        let label = if self.label.is_empty() {
            format!("fan{}", self.id)
        } else {
            self.label.clone()
        };
        if self.name.is_empty() {
            label
        } else {
            format!("{}/{}", self.name, label)
        }
    }
}

/// Read out the fans of one `hwmon` folder.
///
/// ## What is read:
///
/// - Mandatory: `fanN_input`, the speed in RPM. Fans without it are skipped.
/// - Optional: `name` of the `hwmon`.
/// - Optional: `fanN_label`.
///
/// Kernel hwmon API: https://www.kernel.org/doc/html/latest/hwmon/sysfs-interface.html
pub fn fans_from_hwmon(sensors: &mut Vec<FanSensor>, folder: &Path) -> Option<()> {
    let dir = read_dir(folder).ok()?;
    let name = get_file_line(&folder.join("name"), 16).unwrap_or_default();
    for entry in dir.flatten() {
        if !entry.file_type().is_ok_and(|file_type| !file_type.is_dir()) {
            continue;
        }

        let entry = entry.path();
        let filename = entry.file_name().and_then(|x| x.to_str()).unwrap_or("");
        let Some((id, item)) = filename
            .strip_prefix("fan")
            .and_then(|f| f.split_once('_'))
            .and_then(|(id, item)| Some((id.parse::<u32>().ok()?, item)))
        else {
            continue;
        };

        if item != "input" {
            continue;
        }

        let Some(rpm) = read_number_from_file::<u32>(&entry) else {
            continue;
        };
        let label =
            get_file_line(&folder.join(format!("fan{}_label", id)), 16).unwrap_or_default();
        sensors.push(FanSensor {
            id,
            name: name.clone(),
            label,
            rpm,
        });
    }

    Some(())
}

/// Every fan under `root` (normally [`HWMON_ROOT`]), keyed by display name.
/// `None` when `root` cannot be read at all.
pub fn scan_fans(root: &Path) -> Option<IndexMap<String, u32>> {
    read_dir(root).ok()?;
    let mut folders: Vec<_> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    folders.sort();

    let mut sensors = Vec::new();
    for folder in &folders {
        fans_from_hwmon(&mut sensors, folder);
    }
    sensors.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

    Some(
        sensors
            .into_iter()
            .map(|s| (s.display_name(), s.rpm))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_fans_reads_labelled_and_unlabelled() {
        let root = tempfile::tempdir().unwrap();
        let hwmon0 = root.path().join("hwmon0");
        fs::create_dir(&hwmon0).unwrap();
        fs::write(hwmon0.join("name"), "nct6775\n").unwrap();
        fs::write(hwmon0.join("fan1_input"), "1200\n").unwrap();
        fs::write(hwmon0.join("fan1_label"), "CPU Fan\n").unwrap();
        fs::write(hwmon0.join("fan2_input"), "830\n").unwrap();
        fs::write(hwmon0.join("fan2_min"), "0\n").unwrap();
        fs::write(hwmon0.join("temp1_input"), "45000\n").unwrap();

        let hwmon1 = root.path().join("hwmon1");
        fs::create_dir(&hwmon1).unwrap();
        fs::write(hwmon1.join("name"), "coretemp\n").unwrap();
        fs::write(hwmon1.join("temp1_input"), "52000\n").unwrap();

        let fans = scan_fans(root.path()).unwrap();
        assert_eq!(fans.len(), 2);
        assert_eq!(fans.get("nct6775/CPU Fan"), Some(&1200));
        assert_eq!(fans.get("nct6775/fan2"), Some(&830));
    }

    #[test]
    fn test_scan_fans_missing_root() {
        let root = tempfile::tempdir().unwrap();
        assert!(scan_fans(&root.path().join("absent")).is_none());
    }
}
