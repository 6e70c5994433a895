use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::Serialize;

use crate::aggregator::ErrorRecord;

pub mod cpu;
pub mod disk;
pub mod memory;
pub mod network;
pub mod nvidia;
pub mod smart;
pub mod stress;
pub mod system;

/// One reading of every telemetry source. Optional fields are `None` when the
/// reading was unavailable this tick.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSnapshot {
    pub taken_at: DateTime<Local>,
    pub cpu: cpu::CpuInfo,
    /// Sensor label to °C, in discovery order.
    pub temperatures: IndexMap<String, f64>,
    /// Sensor name to RPM, in discovery order.
    pub fans: IndexMap<String, u32>,
    pub ram: Option<memory::RamInfo>,
    /// MHz
    pub ram_frequency: Option<u32>,
    /// Percent of the monitored mount point.
    pub disk_usage: Option<f64>,
    pub disk_io: Option<disk::DiskIoRate>,
    pub gpu: nvidia::GpuInfo,
    pub network: Option<network::NetworkRate>,
    /// Watts
    pub power: Option<f64>,
    pub top_processes: Vec<system::ProcessInfo>,
}

impl Default for MetricSnapshot {
    fn default() -> Self {
        Self {
            taken_at: Local::now(),
            cpu: cpu::CpuInfo::default(),
            temperatures: IndexMap::new(),
            fans: IndexMap::new(),
            ram: None,
            ram_frequency: None,
            disk_usage: None,
            disk_io: None,
            gpu: nvidia::GpuInfo::unavailable(),
            network: None,
            power: None,
            top_processes: Vec::new(),
        }
    }
}

/// What a consumer receives once per sampling tick.
#[derive(Debug, Clone, Serialize)]
pub struct Tick {
    pub snapshot: MetricSnapshot,
    /// Every error recorded so far, oldest first.
    pub errors: Vec<ErrorRecord>,
    pub alerts: Vec<String>,
}
