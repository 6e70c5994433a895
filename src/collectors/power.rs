use log::debug;
use std::path::Path;
use std::time::Instant;

use crate::error::ReadingError;
use crate::utils::file::read_number_from_file;

/// Reads a sysfs `power_now` file (microwatts) and returns watts.
pub fn collect_power(path: &Path) -> Result<f64, ReadingError> {
    let start = Instant::now();
    let result = read_number_from_file::<u64>(path)
        .map(|microwatts| microwatts as f64 / 1_000_000.0)
        .ok_or_else(|| {
            ReadingError::unavailable(format!("cannot read {}", path.display()))
        });
    debug!("collect_power took: {} ms", start.elapsed().as_millis());
    result
}
