use chrono::{DateTime, Local};
use log::warn;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::models::stress::WorkloadKind;

/// Which sub-reading or workload raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    CpuUsage,
    CpuFreq,
    CpuTemp,
    Temperatures,
    Fans,
    Ram,
    RamFreq,
    DiskUsage,
    DiskIo,
    Gpu,
    Network,
    Power,
    TopProcesses,
    Smart,
    Stress(WorkloadKind),
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorSource::CpuUsage => "cpu_usage",
            ErrorSource::CpuFreq => "cpu_freq",
            ErrorSource::CpuTemp => "cpu_temp",
            ErrorSource::Temperatures => "temperatures",
            ErrorSource::Fans => "fans",
            ErrorSource::Ram => "ram",
            ErrorSource::RamFreq => "ram_freq",
            ErrorSource::DiskUsage => "disk_usage",
            ErrorSource::DiskIo => "disk_io",
            ErrorSource::Gpu => "gpu",
            ErrorSource::Network => "net",
            ErrorSource::Power => "power",
            ErrorSource::TopProcesses => "top_processes",
            ErrorSource::Smart => "smart",
            ErrorSource::Stress(kind) => return write!(f, "stress/{}", kind),
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Local>,
    pub source: ErrorSource,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(source: ErrorSource, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            source,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.source,
            self.message
        )
    }
}

/// Append-only, shared list of failures. Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct ErrorAggregator {
    records: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, source: ErrorSource, message: impl Into<String>) {
        self.push(ErrorRecord::new(source, message));
    }

    pub fn push(&self, record: ErrorRecord) {
        warn!("{}: {}", record.source, record.message);
        // A panic while holding the lock cannot leave the Vec half-written.
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.push(record);
    }

    pub fn extend(&self, new_records: impl IntoIterator<Item = ErrorRecord>) {
        for record in new_records {
            self.push(record);
        }
    }

    /// Stable copy of every record so far, in insertion order.
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_snapshot_is_a_stable_copy() {
        let errors = ErrorAggregator::new();
        errors.record(ErrorSource::Gpu, "nvidia-smi not found");

        let snapshot = errors.snapshot();
        errors.record(ErrorSource::Power, "no battery");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(errors.len(), 2);
        assert_eq!(snapshot[0].source, ErrorSource::Gpu);
    }

    #[test]
    fn test_concurrent_append_keeps_every_record() {
        let errors = ErrorAggregator::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let errors = errors.clone();
                thread::spawn(move || {
                    for j in 0..50 {
                        errors
                            .record(ErrorSource::Ram, format!("worker {} entry {}", i, j));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(errors.len(), 400);
    }

    #[test]
    fn test_source_display() {
        assert_eq!(ErrorSource::DiskIo.to_string(), "disk_io");
        assert_eq!(
            ErrorSource::Stress(WorkloadKind::Disk).to_string(),
            "stress/disk"
        );
    }
}
