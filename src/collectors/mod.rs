use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::System as SysInfo;
use systemstat::{Platform, System as SystemStat};

use crate::config::ResourcesConfig;
use crate::delta::CounterPair;
use crate::error::ReadingError;
use crate::models::memory::RamInfo;
use crate::models::nvidia::GpuInfo;
use crate::models::system::ProcessInfo;
use crate::utils::hwmon::{self, HWMON_ROOT};

pub mod command;
pub mod cpu;
pub mod disk;
pub mod memory;
pub mod network;
pub mod nvidia;
pub mod power;
pub mod smart;
pub mod system;

/// Everything the sampler can read from a host. Each method is one
/// independent sub-reading; an error only affects that reading.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    fn cpu_usage(&mut self) -> Result<Vec<f32>, ReadingError>;
    fn cpu_frequency(&mut self) -> Result<f64, ReadingError>;
    fn cpu_temperature(&mut self) -> Result<f64, ReadingError>;
    /// Every temperature sensor, label to °C.
    fn temperatures(&mut self) -> Result<IndexMap<String, f64>, ReadingError>;
    fn fan_speeds(&mut self) -> Result<IndexMap<String, u32>, ReadingError>;
    fn memory(&mut self) -> Result<RamInfo, ReadingError>;
    fn disk_usage(&mut self) -> Result<f64, ReadingError>;
    /// Cumulative bytes (read, written).
    fn disk_counters(&mut self) -> Result<CounterPair, ReadingError>;
    /// Cumulative bytes (sent, received).
    fn network_counters(&mut self) -> Result<CounterPair, ReadingError>;
    fn power_draw(&mut self) -> Result<f64, ReadingError>;
    fn top_processes(&mut self, count: usize) -> Result<Vec<ProcessInfo>, ReadingError>;

    async fn memory_frequency(&self) -> Result<u32, ReadingError>;
    async fn gpu(&self) -> Result<GpuInfo, ReadingError>;
}

/// The machine we are running on.
pub struct HostTelemetry {
    sys_info: SysInfo,
    sys_stat: SystemStat,
    resources: ResourcesConfig,
    command_timeout: Duration,
    hwmon_root: PathBuf,
}

impl HostTelemetry {
    pub fn new(resources: ResourcesConfig, command_timeout: Duration) -> Self {
        let mut sys_info = SysInfo::new();
        // Primes the CPU and process baselines so the first tick is not all zeros.
        sys_info.refresh_cpu_all();
        sys_info.refresh_memory();
        Self {
            sys_info,
            sys_stat: SystemStat::new(),
            resources,
            command_timeout,
            hwmon_root: PathBuf::from(HWMON_ROOT),
        }
    }
}

#[async_trait]
impl TelemetrySource for HostTelemetry {
    fn cpu_usage(&mut self) -> Result<Vec<f32>, ReadingError> {
        cpu::collect_per_core(&mut self.sys_info)
    }

    fn cpu_frequency(&mut self) -> Result<f64, ReadingError> {
        cpu::collect_frequency(&self.sys_info)
    }

    fn cpu_temperature(&mut self) -> Result<f64, ReadingError> {
        cpu::collect_temperature(&self.sys_stat)
    }

    fn temperatures(&mut self) -> Result<IndexMap<String, f64>, ReadingError> {
        cpu::collect_sensor_temperatures()
    }

    fn fan_speeds(&mut self) -> Result<IndexMap<String, u32>, ReadingError> {
        hwmon::scan_fans(&self.hwmon_root)
            .filter(|fans| !fans.is_empty())
            .ok_or_else(|| ReadingError::unavailable("no fan sensors found"))
    }

    fn memory(&mut self) -> Result<RamInfo, ReadingError> {
        memory::collect_ram(&mut self.sys_info)
    }

    fn disk_usage(&mut self) -> Result<f64, ReadingError> {
        disk::collect_usage(&self.resources.mount_point)
    }

    fn disk_counters(&mut self) -> Result<CounterPair, ReadingError> {
        disk::collect_counters(&self.sys_stat, &self.resources.disks)
    }

    fn network_counters(&mut self) -> Result<CounterPair, ReadingError> {
        network::collect_counters(&self.sys_stat, &self.resources.networks)
    }

    fn power_draw(&mut self) -> Result<f64, ReadingError> {
        power::collect_power(std::path::Path::new(&self.resources.power_supply))
    }

    fn top_processes(&mut self, count: usize) -> Result<Vec<ProcessInfo>, ReadingError> {
        system::collect_processes(&mut self.sys_info, count)
    }

    async fn memory_frequency(&self) -> Result<u32, ReadingError> {
        memory::collect_frequency(self.command_timeout).await
    }

    async fn gpu(&self) -> Result<GpuInfo, ReadingError> {
        nvidia::collect(self.command_timeout).await
    }
}
