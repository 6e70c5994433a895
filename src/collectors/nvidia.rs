use log::debug;
use std::time::{Duration, Instant};

use crate::collectors::command::run_with_timeout;
use crate::error::ReadingError;
use crate::models::nvidia::GpuInfo;

pub const QUERY: &str = "--query-gpu=utilization.gpu,utilization.memory,temperature.gpu";

pub async fn collect(timeout: Duration) -> Result<GpuInfo, ReadingError> {
    let start = Instant::now();
    let output = run_with_timeout("nvidia-smi", &[QUERY, "--format=csv"], timeout).await?;
    let result = parse_query_csv(&output);
    debug!(
        "collect (total Nvidia GPU info collection) took: {} ms",
        start.elapsed().as_millis()
    );
    result
}

/// Parses the first GPU row of `nvidia-smi --format=csv` output. The header row
/// is skipped and `%` suffixes are dropped. Fields that are not numeric
/// (`[N/A]`, `[Not Supported]`) come back as `None`.
pub fn parse_query_csv(output: &str) -> Result<GpuInfo, ReadingError> {
    let line = output
        .lines()
        .skip(1)
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| ReadingError::parse("nvidia-smi", "no GPU rows"))?;

    let values: Vec<Option<f64>> = line
        .split(',')
        .map(|field| field.trim().trim_end_matches('%').trim().parse::<f64>().ok())
        .collect();

    if values.len() < 3 {
        return Err(ReadingError::parse(
            "nvidia-smi",
            format!("expected 3 fields, got {}: {:?}", values.len(), line),
        ));
    }
    if values.iter().all(Option::is_none) {
        return Err(ReadingError::parse(
            "nvidia-smi",
            format!("no numeric fields in {:?}", line),
        ));
    }

    Ok(GpuInfo {
        usage: values[0],
        memory: values[1],
        temperature: values[2],
    })
}
