use serde::Serialize;

/// Disk throughput derived from cumulative counters, MiB/s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DiskIoRate {
    pub read: f64,
    pub write: f64,
}
