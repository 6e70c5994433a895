use indexmap::IndexMap;
use log::debug;
use std::time::Instant;
use sysinfo::{Components, System as SysInfo};
use systemstat::{Platform, System};

use crate::error::ReadingError;

/// Per-core utilisation since the previous refresh of `sys`. The very first
/// call after start-up reports zeros.
pub fn collect_per_core(sys: &mut SysInfo) -> Result<Vec<f32>, ReadingError> {
    let start = Instant::now();
    sys.refresh_cpu_all();
    let result: Vec<f32> = sys.cpus().iter().map(|cpu| cpu.cpu_usage()).collect();
    debug!("collect_per_core took: {} ms", start.elapsed().as_millis());
    if result.is_empty() {
        return Err(ReadingError::unavailable("no CPUs reported"));
    }
    Ok(result)
}

/// Current frequency of the first core, MHz. Relies on `collect_per_core`
/// having refreshed `sys` this tick.
pub fn collect_frequency(sys: &SysInfo) -> Result<f64, ReadingError> {
    let start = Instant::now();
    let result = match sys.cpus().first().map(|cpu| cpu.frequency()) {
        Some(freq) if freq > 0 => Ok(freq as f64),
        _ => Err(ReadingError::unavailable("CPU frequency not reported")),
    };
    debug!("collect_frequency took: {} ms", start.elapsed().as_millis());
    result
}

pub fn collect_temperature(sys_stat: &System) -> Result<f64, ReadingError> {
    let start = Instant::now();
    let components = Components::new_with_refreshed_list();
    let readings = components
        .list()
        .iter()
        .map(|c| (c.label().to_string(), c.temperature()));
    let result = match pick_cpu_temperature(readings) {
        Some(temp) => Ok(temp as f64),
        None => sys_stat
            .cpu_temp()
            .map(|temp| temp as f64)
            .map_err(|e| {
                ReadingError::unavailable(format!("no CPU temperature sensor: {}", e))
            }),
    };
    debug!("collect_temperature took: {} ms", start.elapsed().as_millis());
    result
}

/// Every readable temperature sensor, label to °C, in discovery order.
pub fn collect_sensor_temperatures() -> Result<IndexMap<String, f64>, ReadingError> {
    let start = Instant::now();
    let components = Components::new_with_refreshed_list();
    let sensors = readable_temperatures(
        components
            .list()
            .iter()
            .map(|c| (c.label().to_string(), c.temperature())),
    );
    debug!(
        "collect_sensor_temperatures took: {} ms",
        start.elapsed().as_millis()
    );
    if sensors.is_empty() {
        return Err(ReadingError::unavailable("no temperature sensors found"));
    }
    Ok(sensors)
}

pub fn readable_temperatures<I>(readings: I) -> IndexMap<String, f64>
where
    I: IntoIterator<Item = (String, Option<f32>)>,
{
    readings
        .into_iter()
        .filter_map(|(label, temp)| Some((label, temp?)))
        .filter(|(_, temp)| temp.is_finite())
        .map(|(label, temp)| (label, temp as f64))
        .collect()
}

/// First sensor that looks like the CPU package: `coretemp` or a label
/// mentioning `cpu`, then AMD `k10temp`/`package` labels.
pub fn pick_cpu_temperature<I>(readings: I) -> Option<f32>
where
    I: IntoIterator<Item = (String, Option<f32>)>,
{
    let readings: Vec<(String, f32)> = readings
        .into_iter()
        .filter_map(|(label, temp)| Some((label.to_lowercase(), temp?)))
        .filter(|(_, temp)| temp.is_finite())
        .collect();

    readings
        .iter()
        .find(|(label, _)| label.contains("coretemp") || label.contains("cpu"))
        .or_else(|| {
            readings
                .iter()
                .find(|(label, _)| label.contains("k10temp") || label.contains("package"))
        })
        .map(|(_, temp)| *temp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_prefers_coretemp() {
        let readings = vec![
            ("nvme Composite".to_string(), Some(38.0)),
            ("coretemp Package id 0".to_string(), Some(51.0)),
            ("coretemp Core 0".to_string(), Some(49.0)),
        ];
        assert_eq!(pick_cpu_temperature(readings), Some(51.0));
    }

    #[test]
    fn test_pick_falls_back_to_k10temp() {
        let readings = vec![
            ("amdgpu edge".to_string(), Some(60.0)),
            ("k10temp Tctl".to_string(), Some(63.5)),
        ];
        assert_eq!(pick_cpu_temperature(readings), Some(63.5));
    }

    #[test]
    fn test_readable_temperatures_keep_order() {
        let readings = vec![
            ("nvme Composite".to_string(), Some(38.0)),
            ("CPU".to_string(), None),
            ("acpitz temp1".to_string(), Some(f32::NAN)),
            ("coretemp Package id 0".to_string(), Some(51.5)),
        ];
        let sensors = readable_temperatures(readings);
        let labels: Vec<_> = sensors.keys().map(String::as_str).collect();
        assert_eq!(labels, ["nvme Composite", "coretemp Package id 0"]);
        assert_eq!(sensors["coretemp Package id 0"], 51.5);
    }

    #[test]
    fn test_pick_skips_unreadable() {
        let readings = vec![
            ("CPU".to_string(), None),
            ("acpitz temp1".to_string(), Some(27.8)),
        ];
        assert_eq!(pick_cpu_temperature(readings), None);
    }
}
