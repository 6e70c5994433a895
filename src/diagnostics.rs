use crate::config::DiagnosticsConfig;
use crate::models::MetricSnapshot;

/// Health warnings for one snapshot. Missing readings never raise a warning.
pub fn check(snapshot: &MetricSnapshot, thresholds: &DiagnosticsConfig) -> Vec<String> {
    let mut alerts = Vec::new();

    if let Some(avg) = snapshot.cpu.average() {
        if avg as f64 > thresholds.cpu_usage_percent {
            alerts.push("High CPU usage detected".to_string());
        }
    }
    if let Some(ram) = snapshot.ram {
        if ram.percent > thresholds.ram_usage_percent {
            alerts.push("High RAM usage detected".to_string());
        }
    }
    if let Some(disk) = snapshot.disk_usage {
        if disk > thresholds.disk_usage_percent {
            alerts.push("Low disk space".to_string());
        }
    }
    // The CPU reading is only checked on its own when no sensor list was read.
    if snapshot.temperatures.is_empty() {
        if let Some(temp) = snapshot.cpu.temperature {
            if temp > thresholds.temperature_c {
                alerts.push(format!("High CPU temperature: {:.1}°C", temp));
            }
        }
    }
    for (name, temp) in &snapshot.temperatures {
        if *temp > thresholds.temperature_c {
            alerts.push(format!("High temperature on {}: {:.1}°C", name, temp));
        }
    }
    if let Some(temp) = snapshot.gpu.temperature {
        if temp > thresholds.temperature_c {
            alerts.push(format!("High GPU temperature: {:.1}°C", temp));
        }
    }

    alerts
}
