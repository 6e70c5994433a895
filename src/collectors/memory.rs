use log::debug;
use std::time::{Duration, Instant};
use sysinfo::System as SysInfo;

use crate::collectors::command::run_with_timeout;
use crate::error::ReadingError;
use crate::models::memory::RamInfo;

pub fn collect_ram(sys: &mut SysInfo) -> Result<RamInfo, ReadingError> {
    let start = Instant::now();
    sys.refresh_memory();
    let total = sys.total_memory();
    let result = if total == 0 {
        Err(ReadingError::unavailable("total memory reported as 0"))
    } else {
        Ok(RamInfo::from_bytes(sys.used_memory(), total))
    };
    debug!("collect_ram took: {} ms", start.elapsed().as_millis());
    result
}

/// Memory that can be handed out right now without swapping, bytes.
pub fn available_bytes() -> Option<u64> {
    let mut sys = SysInfo::new();
    sys.refresh_memory();
    match sys.available_memory() {
        0 => None,
        bytes => Some(bytes),
    }
}

pub async fn collect_frequency(timeout: Duration) -> Result<u32, ReadingError> {
    let start = Instant::now();
    let output = run_with_timeout("dmidecode", &["-t", "17"], timeout).await?;
    let result = parse_dmidecode_speed(&output).ok_or_else(|| {
        ReadingError::parse("dmidecode", "no line with both Speed and MHz")
    });
    debug!("collect_frequency (dmidecode) took: {} ms", start.elapsed().as_millis());
    result
}

/// First line mentioning both `Speed` and `MHz`: the first word after the
/// colon, as a number.
pub fn parse_dmidecode_speed(output: &str) -> Option<u32> {
    let line = output
        .lines()
        .find(|line| line.contains("Speed") && line.contains("MHz"))?;
    let (_, value) = line.split_once(':')?;
    value.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dmidecode_speed() {
        let out = "Memory Device\n\tSize: 16384 MB\n\tType: DDR4\n\tSpeed: 3200 MHz\n\tConfigured Memory Speed: 2933 MHz\n";
        assert_eq!(parse_dmidecode_speed(out), Some(3200));
    }

    #[test]
    fn test_parse_dmidecode_unknown_speed() {
        let out = "Memory Device\n\tSpeed: Unknown\n\tConfigured Memory Speed: 2400 MHz\n";
        assert_eq!(parse_dmidecode_speed(out), Some(2400));
    }

    #[test]
    fn test_parse_dmidecode_mts_only() {
        let out = "Memory Device\n\tSpeed: 4800 MT/s\n";
        assert_eq!(parse_dmidecode_speed(out), None);
    }
}
