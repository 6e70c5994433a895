use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Cpu,
    Ram,
    Disk,
    Gpu,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 4] = [
        WorkloadKind::Cpu,
        WorkloadKind::Ram,
        WorkloadKind::Disk,
        WorkloadKind::Gpu,
    ];
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            WorkloadKind::Cpu => "cpu",
            WorkloadKind::Ram => "ram",
            WorkloadKind::Disk => "disk",
            WorkloadKind::Gpu => "gpu",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    /// Stopped before the deadline by a stop request.
    Cancelled,
    Rejected(String),
    Failed(String),
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => f.write_str("completed"),
            RunStatus::Cancelled => f.write_str("cancelled"),
            RunStatus::Rejected(reason) => write!(f, "rejected ({})", reason),
            RunStatus::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuMeasurements {
    pub workers_spawned: usize,
    /// Workers still alive right before they were killed.
    pub workers_active: usize,
    pub workers_reaped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RamMeasurements {
    pub test_size_bytes: u64,
    pub iterations: u64,
    pub seq_speed_mibs: f64,
    pub seq_latency_ms: f64,
    pub rand_speed_mibs: f64,
    pub rand_latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternThroughput {
    pub label: String,
    pub read_mibs: f64,
    pub write_mibs: f64,
    pub passes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuMeasurements {
    pub device: String,
    pub dispatches: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Measurements {
    None,
    Cpu(CpuMeasurements),
    Ram(RamMeasurements),
    Disk(Vec<PatternThroughput>),
    Gpu(GpuMeasurements),
}

impl Measurements {
    /// Flat `key=value` view used by the console and CSV outputs.
    pub fn key_values(&self) -> Vec<(String, String)> {
        match self {
            Measurements::None => Vec::new(),
            Measurements::Cpu(cpu) => vec![
                ("workers_spawned".into(), cpu.workers_spawned.to_string()),
                ("workers_active".into(), cpu.workers_active.to_string()),
                ("workers_reaped".into(), cpu.workers_reaped.to_string()),
            ],
            Measurements::Ram(ram) => vec![
                ("test_size_bytes".into(), ram.test_size_bytes.to_string()),
                ("iterations".into(), ram.iterations.to_string()),
                ("seq_speed_mibs".into(), format!("{:.2}", ram.seq_speed_mibs)),
                ("seq_latency_ms".into(), format!("{:.6}", ram.seq_latency_ms)),
                ("rand_speed_mibs".into(), format!("{:.2}", ram.rand_speed_mibs)),
                ("rand_latency_ms".into(), format!("{:.6}", ram.rand_latency_ms)),
            ],
            Measurements::Disk(patterns) => patterns
                .iter()
                .flat_map(|p| {
                    [
                        (format!("{}_read_mibs", p.label), format!("{:.2}", p.read_mibs)),
                        (format!("{}_write_mibs", p.label), format!("{:.2}", p.write_mibs)),
                    ]
                })
                .collect(),
            Measurements::Gpu(gpu) => vec![
                ("device".into(), gpu.device.clone()),
                ("dispatches".into(), gpu.dispatches.to_string()),
            ],
        }
    }
}

/// Outcome of one workload run. Built once when the run ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StressResult {
    pub kind: WorkloadKind,
    pub started_at: DateTime<Local>,
    pub elapsed_secs: f64,
    pub status: RunStatus,
    pub measurements: Measurements,
}

impl StressResult {
    pub fn new(
        kind: WorkloadKind,
        started_at: DateTime<Local>,
        elapsed: Duration,
        status: RunStatus,
        measurements: Measurements,
    ) -> Self {
        Self {
            kind,
            started_at,
            elapsed_secs: elapsed.as_secs_f64(),
            status,
            measurements,
        }
    }

    pub fn rejected(kind: WorkloadKind, reason: impl Into<String>) -> Self {
        Self::new(
            kind,
            Local::now(),
            Duration::ZERO,
            RunStatus::Rejected(reason.into()),
            Measurements::None,
        )
    }

    pub fn failed(
        kind: WorkloadKind,
        started_at: DateTime<Local>,
        elapsed: Duration,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            kind,
            started_at,
            elapsed,
            RunStatus::Failed(reason.into()),
            Measurements::None,
        )
    }
}
