use chrono::{DateTime, Local};
use log::{debug, error};
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::models::smart::SmartReport;
use crate::output::console::View;
use crate::models::stress::StressResult;
use crate::models::{MetricSnapshot, Tick};
use crate::sampling::MetricsConsumer;

pub const METRICS_FILE: &str = "metrics.csv";
pub const STRESS_FILE: &str = "stress_results.csv";
pub const SMART_FILE: &str = "smart_metrics.csv";
pub const CPU_FILE: &str = "cpu_metrics.csv";
pub const RAM_FILE: &str = "ram_metrics.csv";
pub const DISK_FILE: &str = "disk_metrics.csv";
pub const GPU_FILE: &str = "gpu_metrics.csv";

pub const METRICS_HEADER: [&str; 21] = [
    "timestamp",
    "cpu_per_core",
    "cpu_avg",
    "cpu_freq_mhz",
    "cpu_temp_c",
    "fans",
    "ram_percent",
    "ram_used_gib",
    "ram_free_gib",
    "ram_total_gib",
    "ram_freq_mhz",
    "disk_percent",
    "disk_read_mibs",
    "disk_write_mibs",
    "gpu_usage",
    "gpu_memory",
    "gpu_temp",
    "net_sent_mibs",
    "net_recv_mibs",
    "power_w",
    "top_processes",
];

pub const STRESS_HEADER: [&str; 5] = [
    "timestamp",
    "kind",
    "status",
    "elapsed_s",
    "measurements",
];

pub const SMART_HEADER: [&str; 6] = [
    "timestamp",
    "device",
    "temperature",
    "health",
    "reallocated",
    "wear",
];

pub const CPU_HEADER: [&str; 4] = ["timestamp", "cpu_avg", "cpu_freq_mhz", "cpu_temp_c"];
pub const RAM_HEADER: [&str; 4] = ["timestamp", "ram_percent", "ram_used_gib", "ram_freq_mhz"];
pub const DISK_HEADER: [&str; 4] = [
    "timestamp",
    "disk_percent",
    "disk_read_mibs",
    "disk_write_mibs",
];
pub const GPU_HEADER: [&str; 4] = ["timestamp", "gpu_usage", "gpu_memory", "gpu_temp"];

/// Turns one snapshot into the fields of a row.
pub type TickRow = fn(&MetricSnapshot) -> Vec<String>;

/// Unix seconds with millisecond precision.
fn timestamp(at: &DateTime<Local>) -> String {
    format!("{:.3}", at.timestamp_millis() as f64 / 1000.0)
}

/// Unavailable values become empty fields.
fn opt<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn opt2(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

/// Quotes a field when it contains a separator, quote or newline.
pub fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn metric_row(s: &MetricSnapshot) -> Vec<String> {
    let per_core = s
        .cpu
        .per_core
        .iter()
        .map(|v| format!("{:.1}", v))
        .collect::<Vec<_>>()
        .join(";");
    let fans = s
        .fans
        .iter()
        .map(|(name, rpm)| format!("{}={}", name, rpm))
        .collect::<Vec<_>>()
        .join(";");
    let processes = s
        .top_processes
        .iter()
        .map(|p| format!("{}:{:.1}:{:.1}", p.name, p.cpu_percent, p.memory_percent))
        .collect::<Vec<_>>()
        .join(";");

    vec![
        timestamp(&s.taken_at),
        per_core,
        opt2(s.cpu.average().map(f64::from)),
        opt2(s.cpu.frequency),
        opt2(s.cpu.temperature),
        fans,
        opt2(s.ram.map(|r| r.percent)),
        opt2(s.ram.map(|r| r.used)),
        opt2(s.ram.map(|r| r.free)),
        opt2(s.ram.map(|r| r.total)),
        opt(s.ram_frequency),
        opt2(s.disk_usage),
        opt2(s.disk_io.map(|d| d.read)),
        opt2(s.disk_io.map(|d| d.write)),
        opt2(s.gpu.usage),
        opt2(s.gpu.memory),
        opt2(s.gpu.temperature),
        opt2(s.network.map(|n| n.sent)),
        opt2(s.network.map(|n| n.received)),
        opt2(s.power),
        processes,
    ]
}

pub fn cpu_row(s: &MetricSnapshot) -> Vec<String> {
    vec![
        timestamp(&s.taken_at),
        opt2(s.cpu.average().map(f64::from)),
        opt2(s.cpu.frequency),
        opt2(s.cpu.temperature),
    ]
}

pub fn ram_row(s: &MetricSnapshot) -> Vec<String> {
    vec![
        timestamp(&s.taken_at),
        opt2(s.ram.map(|r| r.percent)),
        opt2(s.ram.map(|r| r.used)),
        opt(s.ram_frequency),
    ]
}

pub fn disk_row(s: &MetricSnapshot) -> Vec<String> {
    vec![
        timestamp(&s.taken_at),
        opt2(s.disk_usage),
        opt2(s.disk_io.map(|d| d.read)),
        opt2(s.disk_io.map(|d| d.write)),
    ]
}

pub fn gpu_row(s: &MetricSnapshot) -> Vec<String> {
    vec![
        timestamp(&s.taken_at),
        opt2(s.gpu.usage),
        opt2(s.gpu.memory),
        opt2(s.gpu.temperature),
    ]
}

/// File name, header and row of the narrower file a view records next to
/// `metrics.csv`. The overview has none.
pub fn view_layout(view: View) -> Option<(&'static str, &'static [&'static str], TickRow)> {
    match view {
        View::Overview => None,
        View::Cpu => Some((CPU_FILE, &CPU_HEADER as &[&str], cpu_row as TickRow)),
        View::Ram => Some((RAM_FILE, &RAM_HEADER as &[&str], ram_row as TickRow)),
        View::Disk => Some((DISK_FILE, &DISK_HEADER as &[&str], disk_row as TickRow)),
        View::Gpu => Some((GPU_FILE, &GPU_HEADER as &[&str], gpu_row as TickRow)),
    }
}

pub fn stress_row(result: &StressResult) -> Vec<String> {
    let measurements = result
        .measurements
        .key_values()
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(";");
    vec![
        timestamp(&result.started_at),
        result.kind.to_string(),
        result.status.to_string(),
        format!("{:.2}", result.elapsed_secs),
        measurements,
    ]
}

pub fn smart_row(at: &DateTime<Local>, report: &SmartReport) -> Vec<String> {
    vec![
        timestamp(at),
        report.device.clone(),
        opt(report.temperature),
        report.health.to_string(),
        report.reallocated_sectors.to_string(),
        opt(report.wear_level),
    ]
}

/// Appends rows to one CSV file, writing the header when the file is new.
/// As a tick consumer it writes `tick_row` of each snapshot, `metric_row`
/// unless set otherwise.
pub struct CsvRecorder {
    path: PathBuf,
    file: File,
    tick_row: TickRow,
}

impl CsvRecorder {
    pub fn create(dir: &Path, name: &str, header: &[&str]) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut recorder = Self {
            path,
            file,
            tick_row: metric_row,
        };
        if recorder.file.metadata()?.len() == 0 {
            let header: Vec<String> = header.iter().map(|h| h.to_string()).collect();
            recorder.append(&header)?;
        }
        debug!("Recording CSV to {}", recorder.path.display());
        Ok(recorder)
    }

    pub fn with_tick_row(mut self, tick_row: TickRow) -> Self {
        self.tick_row = tick_row;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, fields: &[String]) -> io::Result<()> {
        let line = fields
            .iter()
            .map(|f| escape(f))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(self.file, "{}", line)
    }
}

impl MetricsConsumer for CsvRecorder {
    fn on_tick(&mut self, tick: &Tick) {
        let row = (self.tick_row)(&tick.snapshot);
        if let Err(e) = self.append(&row) {
            error!("Failed to write {}: {}", self.path.display(), e);
        }
    }
}
