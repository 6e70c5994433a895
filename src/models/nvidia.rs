use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpuInfo {
    /// Utilisation, percent
    pub usage: Option<f64>,
    /// Memory utilisation, percent
    pub memory: Option<f64>,
    /// °C
    pub temperature: Option<f64>,
}

impl GpuInfo {
    pub fn unavailable() -> Self {
        Self {
            usage: None,
            memory: None,
            temperature: None,
        }
    }
}

impl Default for GpuInfo {
    fn default() -> Self {
        Self::unavailable()
    }
}
