use anyhow::{Context, Result};
use config::{Config, File, FileFormat};
use log::{debug, info, warn, LevelFilter};
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "stressmon.ini";

/// Accepts `a,b , c` and returns the trimmed, non-empty items.
fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(split_list(&value))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    pub interval_ms: u64,
    /// Upper bound for nvidia-smi, dmidecode and smartctl invocations.
    pub command_timeout_ms: u64,
    pub top_processes: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            command_timeout_ms: 1000,
            top_processes: 5,
        }
    }
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ResourcesConfig {
    pub mount_point: String,
    /// Block devices summed for disk I/O. Empty means all.
    #[serde(deserialize_with = "deserialize_list")]
    pub disks: Vec<String>,
    /// Interfaces summed for network I/O. Empty means all.
    #[serde(deserialize_with = "deserialize_list")]
    pub networks: Vec<String>,
    /// sysfs file reporting power draw in microwatts.
    pub power_supply: String,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            mount_point: "/".to_string(),
            disks: Vec::new(),
            networks: Vec::new(),
            power_supply: "/sys/class/power_supply/BAT0/power_now".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StressConfig {
    pub duration_secs: u64,
    /// Extra time past the deadline before the run is stopped forcibly.
    pub grace_ms: u64,
    /// 0 means one worker per logical core.
    pub cpu_workers: usize,
    pub cpu_matrix_size: usize,
    pub ram_test_size_mb: u64,
    pub ram_free_multiple: f64,
    pub ram_free_fraction: f64,
    pub ram_pause_ms: u64,
    pub disk_file_size_mb: u64,
    /// Empty means the system temp directory.
    pub disk_scratch_dir: String,
    pub disk_workers: usize,
    pub gpu_matrix_size: u32,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            grace_ms: 2000,
            cpu_workers: 0,
            cpu_matrix_size: 200,
            ram_test_size_mb: 128,
            ram_free_multiple: 1.5,
            ram_free_fraction: 0.5,
            ram_pause_ms: 100,
            disk_file_size_mb: 100,
            disk_scratch_dir: String::new(),
            disk_workers: 4,
            gpu_matrix_size: 1024,
        }
    }
}

impl StressConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        if self.disk_scratch_dir.is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(&self.disk_scratch_dir)
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub cpu_usage_percent: f64,
    pub ram_usage_percent: f64,
    pub disk_usage_percent: f64,
    pub temperature_c: f64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            cpu_usage_percent: 95.0,
            ram_usage_percent: 90.0,
            disk_usage_percent: 90.0,
            temperature_c: 85.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub csv_enabled: bool,
    pub csv_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv_enabled: false,
            csv_dir: ".".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub stress: StressConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads `path`, or the defaults when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            warn!("{} not found, using default configuration", path.display());
            Ok(Self::default())
        }
    }

    pub fn get_log_level(&self) -> LevelFilter {
        match self.logging.level.to_lowercase().as_str() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            "off" => LevelFilter::Off,
            _ => LevelFilter::Info, // Default to Info if invalid
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_path = path.as_ref();
        debug!("Loading configuration from {}", config_path.display());

        let config = Config::builder()
            .add_source(File::from(config_path).format(FileFormat::Ini))
            .build()
            .context(format!("Failed to load config from {}", config_path.display()))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize config")?;

        Ok(app_config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config_path = path.as_ref();

        let mut config_str = String::new();

        config_str.push_str(&format!(
            "[sampling]\ninterval_ms = {}\ncommand_timeout_ms = {}\ntop_processes = {}\n\n",
            self.sampling.interval_ms, self.sampling.command_timeout_ms, self.sampling.top_processes
        ));

        config_str.push_str(&format!(
            "[resources]\nmount_point = {}\ndisks = {}\nnetworks = {}\npower_supply = {}\n\n",
            self.resources.mount_point,
            self.resources.disks.join(","),
            self.resources.networks.join(","),
            self.resources.power_supply
        ));

        let s = &self.stress;
        config_str.push_str(&format!(
            "[stress]\nduration_secs = {}\ngrace_ms = {}\ncpu_workers = {}\ncpu_matrix_size = {}\n\
             ram_test_size_mb = {}\nram_free_multiple = {}\nram_free_fraction = {}\nram_pause_ms = {}\n\
             disk_file_size_mb = {}\ndisk_scratch_dir = {}\ndisk_workers = {}\ngpu_matrix_size = {}\n\n",
            s.duration_secs,
            s.grace_ms,
            s.cpu_workers,
            s.cpu_matrix_size,
            s.ram_test_size_mb,
            s.ram_free_multiple,
            s.ram_free_fraction,
            s.ram_pause_ms,
            s.disk_file_size_mb,
            s.disk_scratch_dir,
            s.disk_workers,
            s.gpu_matrix_size
        ));

        let d = &self.diagnostics;
        config_str.push_str(&format!(
            "[diagnostics]\ncpu_usage_percent = {}\nram_usage_percent = {}\ndisk_usage_percent = {}\ntemperature_c = {}\n\n",
            d.cpu_usage_percent, d.ram_usage_percent, d.disk_usage_percent, d.temperature_c
        ));

        config_str.push_str(&format!(
            "[output]\ncsv_enabled = {}\ncsv_dir = {}\n\n",
            self.output.csv_enabled, self.output.csv_dir
        ));

        config_str.push_str(&format!("[logging]\nlevel = {}\n", self.logging.level));

        fs::write(config_path, config_str)
            .context(format!("Failed to save config to {}", config_path.display()))?;

        info!("Configuration saved to {}", config_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.sampling.interval_ms, 1000);
        assert_eq!(config.sampling.command_timeout_ms, 1000);
        assert_eq!(config.sampling.top_processes, 5);
        assert_eq!(config.resources.mount_point, "/");
        assert_eq!(config.stress.ram_free_multiple, 1.5);
        assert_eq!(config.stress.ram_free_fraction, 0.5);
        assert_eq!(config.stress.disk_workers, 4);
        assert_eq!(config.diagnostics.temperature_c, 85.0);
        assert!(!config.output.csv_enabled);
        assert_eq!(config.get_log_level(), LevelFilter::Info);
    }

    #[test]
    fn test_from_file_partial() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let config_content = "[sampling]\ninterval_ms = 250\n\n[resources]\ndisks = nvme0n1, sda\n\n[stress]\nram_test_size_mb = 64\ndisk_scratch_dir = /tmp/scratch\n\n[logging]\nlevel = debug\n";

        temp_file.write_all(config_content.as_bytes()).unwrap();
        let config = AppConfig::from_file(temp_file.path()).unwrap();

        assert_eq!(config.sampling.interval_ms, 250);
        assert_eq!(config.sampling.top_processes, 5);
        assert_eq!(config.resources.disks, vec!["nvme0n1", "sda"]);
        assert!(config.resources.networks.is_empty());
        assert_eq!(config.stress.ram_test_size_mb, 64);
        assert_eq!(config.stress.scratch_dir(), PathBuf::from("/tmp/scratch"));
        assert_eq!(config.stress.disk_file_size_mb, 100);
        assert_eq!(config.get_log_level(), LevelFilter::Debug);
    }

    #[test]
    fn test_save_config() {
        let mut config = AppConfig::default();
        config.sampling.interval_ms = 500;
        config.resources.networks = vec!["eth0".to_string(), "wlan0".to_string()];
        config.stress.duration_secs = 30;
        config.stress.ram_free_multiple = 2.0;
        config.stress.disk_scratch_dir = "/var/tmp".to_string();
        config.output.csv_enabled = true;
        config.logging.level = "warn".to_string();

        let temp_file = NamedTempFile::new().unwrap();
        let config_path = temp_file.path();

        config.save(config_path).unwrap();

        let loaded_config = AppConfig::from_file(config_path).unwrap();

        assert_eq!(loaded_config.sampling.interval_ms, 500);
        assert_eq!(loaded_config.resources.networks, vec!["eth0", "wlan0"]);
        assert!(loaded_config.resources.disks.is_empty());
        assert_eq!(loaded_config.stress.duration_secs, 30);
        assert_eq!(loaded_config.stress.ram_free_multiple, 2.0);
        assert_eq!(loaded_config.stress.disk_scratch_dir, "/var/tmp");
        assert!(loaded_config.output.csv_enabled);
        assert_eq!(loaded_config.get_log_level(), LevelFilter::Warn);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("absent.ini")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }
}
