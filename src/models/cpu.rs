use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CpuInfo {
    /// Utilisation per logical core, in core order, 0-100.
    pub per_core: Vec<f32>,
    /// MHz
    pub frequency: Option<f64>,
    /// °C
    pub temperature: Option<f64>,
}

impl CpuInfo {
    pub fn average(&self) -> Option<f32> {
        if self.per_core.is_empty() {
            None
        } else {
            Some(self.per_core.iter().sum::<f32>() / self.per_core.len() as f32)
        }
    }
}

impl Default for CpuInfo {
    fn default() -> Self {
        Self {
            per_core: Vec::new(),
            frequency: None,
            temperature: None,
        }
    }
}
