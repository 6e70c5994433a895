use serde::Serialize;

pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// RAM usage. Sizes are in GiB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RamInfo {
    pub percent: f64,
    pub used: f64,
    pub free: f64,
    pub total: f64,
}

impl RamInfo {
    pub fn from_bytes(used: u64, total: u64) -> Self {
        let free = total.saturating_sub(used);
        let percent = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            percent,
            used: used as f64 / GIB,
            free: free as f64 / GIB,
            total: total as f64 / GIB,
        }
    }
}

impl Default for RamInfo {
    fn default() -> Self {
        Self {
            percent: 0.0,
            used: 0.0,
            free: 0.0,
            total: 0.0,
        }
    }
}
