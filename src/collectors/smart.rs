use log::{debug, warn};
use regex::Regex;
use std::time::{Duration, Instant};

use crate::collectors::command::run_with_timeout;
use crate::error::ReadingError;
use crate::models::smart::{Health, SmartReport};

pub struct SmartMonitor {
    timeout: Duration,
}

impl SmartMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Scans for devices and queries each one. Devices whose query fails are
    /// logged and left out.
    pub async fn scan(&self) -> Result<Vec<SmartReport>, ReadingError> {
        let start = Instant::now();
        let scan = run_with_timeout("smartctl", &["--scan"], self.timeout).await?;
        let devices = parse_scan(&scan);
        debug!("smartctl --scan found {} devices", devices.len());

        let mut reports = Vec::with_capacity(devices.len());
        for device in devices {
            match run_with_timeout("smartctl", &["-a", &device], self.timeout).await {
                Ok(output) => reports.push(parse_report(&device, &output)),
                Err(e) => warn!("SMART error for {}: {}", device, e),
            }
        }
        debug!("scan (SMART) took: {} ms", start.elapsed().as_millis());
        Ok(reports)
    }
}

/// First whitespace-delimited token of every non-empty scan line.
pub fn parse_scan(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|device| !device.starts_with('#'))
        .map(String::from)
        .collect()
}

pub fn parse_report(device: &str, output: &str) -> SmartReport {
    let health = if output.contains("PASSED") {
        Health::Pass
    } else {
        Health::Fail
    };
    SmartReport {
        device: device.to_string(),
        health,
        temperature: attribute_raw(output, "Temperature_Celsius").map(|v| v as u32),
        reallocated_sectors: attribute_raw(output, "Reallocated_Sector_Ct").unwrap_or(0),
        wear_level: attribute_raw(output, "Wear_Leveling_Count").map(|v| v as u32),
    }
}

/// `<name> <number> <captured number>` as it appears in the attribute table.
fn attribute_raw(output: &str, name: &str) -> Option<u64> {
    let pattern = format!(r"{}\s+\d+\s+(\d+)", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    re.captures(output)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan() {
        let out = "/dev/sda -d scsi # /dev/sda, SCSI device\n/dev/nvme0 -d nvme # /dev/nvme0, NVMe device\n\n";
        assert_eq!(parse_scan(out), vec!["/dev/sda", "/dev/nvme0"]);
    }

    #[test]
    fn test_parse_report_passed() {
        let out = "SMART overall-health self-assessment test result: PASSED\n\
                   Temperature_Celsius 0x0022 36\n\
                   Reallocated_Sector_Ct 100 8\n\
                   Wear_Leveling_Count 95 12\n";
        let report = parse_report("/dev/sda", out);
        assert_eq!(report.health, Health::Pass);
        assert_eq!(report.reallocated_sectors, 8);
        assert_eq!(report.wear_level, Some(12));
    }

    #[test]
    fn test_parse_report_defaults() {
        let out = "SMART overall-health self-assessment test result: FAILED!\n\
                   Temperature_Celsius 100 41\n";
        let report = parse_report("/dev/sdb", out);
        assert_eq!(report.health, Health::Fail);
        assert_eq!(report.temperature, Some(41));
        assert_eq!(report.reallocated_sectors, 0);
        assert_eq!(report.wear_level, None);
    }
}
