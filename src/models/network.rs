use serde::Serialize;

/// Network throughput derived from cumulative counters, MiB/s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetworkRate {
    pub sent: f64,
    pub received: f64,
}
