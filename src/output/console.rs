use clap::ValueEnum;
use indexmap::IndexMap;
use std::collections::BTreeMap;

use crate::models::smart::SmartReport;
use crate::models::stress::{StressResult, WorkloadKind};
use crate::models::{MetricSnapshot, Tick};
use crate::sampling::MetricsConsumer;

/// What the monitor prints each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum View {
    #[default]
    Overview,
    Cpu,
    Ram,
    Disk,
    Gpu,
}

impl From<WorkloadKind> for View {
    fn from(kind: WorkloadKind) -> Self {
        match kind {
            WorkloadKind::Cpu => View::Cpu,
            WorkloadKind::Ram => View::Ram,
            WorkloadKind::Disk => View::Disk,
            WorkloadKind::Gpu => View::Gpu,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Extremes {
    min: Option<f64>,
    max: Option<f64>,
}

impl Extremes {
    fn observe(&mut self, value: f64) {
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }
}

fn na(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "N/A".to_string(),
    }
}

/// Prints ticks and remembers the lowest and highest value seen per metric.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    view: View,
    extremes: IndexMap<&'static str, Extremes>,
    errors_seen: usize,
}

impl ConsoleReporter {
    pub fn new(view: View) -> Self {
        Self {
            view,
            ..Self::default()
        }
    }

    /// `current (min .. max) unit`, updating the range first.
    fn tracked(&mut self, name: &'static str, value: Option<f64>, unit: &str) -> String {
        let range = self.extremes.entry(name).or_default();
        let Some(current) = value else {
            return format!("{}: N/A", name);
        };
        range.observe(current);
        format!(
            "{}: {:.1}{} ({} .. {})",
            name,
            current,
            unit,
            na(range.min, 1),
            na(range.max, 1)
        )
    }

    /// Lines for one tick, in the order they are printed.
    pub fn render(&mut self, tick: &Tick) -> Vec<String> {
        let s = &tick.snapshot;
        let mut lines = match self.view {
            View::Overview => self.overview(s),
            View::Cpu => self.cpu(s),
            View::Ram => self.ram(s),
            View::Disk => self.disk(s),
            View::Gpu => self.gpu(s),
        };

        lines.extend(tick.alerts.iter().map(|a| format!("ALERT {}", a)));
        let new_errors = tick.errors.len().saturating_sub(self.errors_seen);
        lines.extend(
            tick.errors
                .iter()
                .skip(self.errors_seen)
                .map(|e| format!("ERROR {}", e)),
        );
        self.errors_seen += new_errors;
        lines
    }

    fn overview(&mut self, s: &MetricSnapshot) -> Vec<String> {
        let ram = s.ram.map(|r| r.percent);
        let net = s.network.unwrap_or_default();
        vec![
            format!("[{}]", s.taken_at.format("%H:%M:%S")),
            self.tracked("cpu", s.cpu.average().map(f64::from), "%"),
            self.tracked("ram", ram, "%"),
            self.tracked("disk", s.disk_usage, "%"),
            self.tracked("gpu", s.gpu.usage, "%"),
            format!(
                "net: up {} down {} MiB/s, power: {} W",
                na(s.network.map(|_| net.sent), 2),
                na(s.network.map(|_| net.received), 2),
                na(s.power, 1)
            ),
        ]
    }

    fn cpu(&mut self, s: &MetricSnapshot) -> Vec<String> {
        let cores = s
            .cpu
            .per_core
            .iter()
            .enumerate()
            .map(|(i, v)| format!("#{} {:.0}%", i, v))
            .collect::<Vec<_>>()
            .join(" ");
        let mut lines = vec![
            format!("[{}] cores: {}", s.taken_at.format("%H:%M:%S"), cores),
            self.tracked("cpu_avg", s.cpu.average().map(f64::from), "%"),
            self.tracked("cpu_freq", s.cpu.frequency, " MHz"),
            self.tracked("cpu_temp", s.cpu.temperature, "°C"),
        ];
        for (name, temp) in &s.temperatures {
            lines.push(format!("sensor {}: {:.1}°C", name, temp));
        }
        for (name, rpm) in &s.fans {
            lines.push(format!("fan {}: {} RPM", name, rpm));
        }
        for p in &s.top_processes {
            lines.push(format!(
                "{:<16} {:>8} {:>6.1}% {:>6.1}%",
                p.name.chars().take(16).collect::<String>(),
                p.pid,
                p.cpu_percent,
                p.memory_percent
            ));
        }
        lines
    }

    fn ram(&mut self, s: &MetricSnapshot) -> Vec<String> {
        let mut lines = vec![
            format!("[{}]", s.taken_at.format("%H:%M:%S")),
            self.tracked("ram", s.ram.map(|r| r.percent), "%"),
        ];
        if let Some(ram) = s.ram {
            lines.push(format!(
                "used {:.2} GiB, free {:.2} GiB, total {:.2} GiB",
                ram.used, ram.free, ram.total
            ));
        }
        lines.push(self.tracked("ram_freq", s.ram_frequency.map(f64::from), " MHz"));
        lines
    }

    fn disk(&mut self, s: &MetricSnapshot) -> Vec<String> {
        vec![
            format!("[{}]", s.taken_at.format("%H:%M:%S")),
            self.tracked("disk", s.disk_usage, "%"),
            self.tracked("disk_read", s.disk_io.map(|d| d.read), " MiB/s"),
            self.tracked("disk_write", s.disk_io.map(|d| d.write), " MiB/s"),
        ]
    }

    fn gpu(&mut self, s: &MetricSnapshot) -> Vec<String> {
        vec![
            format!("[{}]", s.taken_at.format("%H:%M:%S")),
            self.tracked("gpu_usage", s.gpu.usage, "%"),
            self.tracked("gpu_memory", s.gpu.memory, "%"),
            self.tracked("gpu_temp", s.gpu.temperature, "°C"),
        ]
    }
}

impl MetricsConsumer for ConsoleReporter {
    fn on_tick(&mut self, tick: &Tick) {
        for line in self.render(tick) {
            println!("{}", line);
        }
    }
}

pub fn format_stress_results(
    results: &BTreeMap<WorkloadKind, StressResult>,
) -> Vec<String> {
    let mut lines = Vec::new();
    for result in results.values() {
        lines.push(format!(
            "{:<5} {} in {:.1}s",
            result.kind, result.status, result.elapsed_secs
        ));
        for (key, value) in result.measurements.key_values() {
            lines.push(format!("      {} = {}", key, value));
        }
    }
    lines
}

pub fn format_smart_reports(reports: &[SmartReport]) -> Vec<String> {
    if reports.is_empty() {
        return vec!["No S.M.A.R.T. capable devices found".to_string()];
    }
    reports
        .iter()
        .map(|r| {
            format!(
                "{}: {} temperature {} reallocated {} wear {}",
                r.device,
                r.health,
                r.temperature.map_or("N/A".to_string(), |t| format!("{}°C", t)),
                r.reallocated_sectors,
                r.wear_level.map_or("N/A".to_string(), |w| w.to_string())
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{ErrorRecord, ErrorSource};
    use crate::models::smart::Health;
    use crate::models::stress::{Measurements, RunStatus};
    use chrono::Local;
    use std::time::Duration;

    fn tick(cpu: Vec<f32>, errors: Vec<ErrorRecord>) -> Tick {
        let mut snapshot = MetricSnapshot::default();
        snapshot.cpu.per_core = cpu;
        Tick {
            snapshot,
            errors,
            alerts: Vec::new(),
        }
    }

    #[test]
    fn test_tracks_min_and_max() {
        let mut reporter = ConsoleReporter::new(View::Overview);
        reporter.render(&tick(vec![50.0], Vec::new()));
        reporter.render(&tick(vec![10.0], Vec::new()));
        let lines = reporter.render(&tick(vec![30.0], Vec::new()));
        assert_eq!(lines[1], "cpu: 30.0% (10.0 .. 50.0)");
        assert_eq!(lines[2], "ram: N/A");
    }

    #[test]
    fn test_errors_are_printed_once() {
        let mut reporter = ConsoleReporter::new(View::Disk);
        let first = vec![ErrorRecord::new(ErrorSource::DiskIo, "permission denied")];
        let lines = reporter.render(&tick(Vec::new(), first.clone()));
        assert_eq!(lines.iter().filter(|l| l.starts_with("ERROR")).count(), 1);

        let mut both = first;
        both.push(ErrorRecord::new(ErrorSource::Gpu, "nvidia-smi not found"));
        let lines = reporter.render(&tick(Vec::new(), both));
        let errors: Vec<_> = lines.iter().filter(|l| l.starts_with("ERROR")).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("gpu: nvidia-smi not found"));
    }

    #[test]
    fn test_stress_results() {
        let mut results = BTreeMap::new();
        results.insert(
            WorkloadKind::Ram,
            StressResult::rejected(WorkloadKind::Ram, "low memory"),
        );
        results.insert(
            WorkloadKind::Cpu,
            StressResult::new(
                WorkloadKind::Cpu,
                Local::now(),
                Duration::from_secs(2),
                RunStatus::Completed,
                Measurements::None,
            ),
        );
        let lines = format_stress_results(&results);
        assert_eq!(
            lines,
            vec![
                "cpu   completed in 2.0s",
                "ram   rejected (low memory) in 0.0s"
            ]
        );
    }

    #[test]
    fn test_smart_reports() {
        let reports = [SmartReport {
            device: "/dev/nvme0".to_string(),
            health: Health::Pass,
            temperature: Some(41),
            reallocated_sectors: 0,
            wear_level: None,
        }];
        assert_eq!(
            format_smart_reports(&reports),
            vec!["/dev/nvme0: PASS temperature 41°C reallocated 0 wear N/A"]
        );
    }
}
