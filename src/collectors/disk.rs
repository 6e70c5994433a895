use log::debug;
use std::path::Path;
use std::time::Instant;
use sysinfo::Disks;
use systemstat::{Platform, System};

use crate::delta::CounterPair;
use crate::error::ReadingError;

const SECTOR_SIZE: u64 = 512;

/// Used space of the filesystem mounted at `mount_point`, percent.
pub fn collect_usage(mount_point: &str) -> Result<f64, ReadingError> {
    let start = Instant::now();
    let disks = Disks::new_with_refreshed_list();
    let result = disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == Path::new(mount_point))
        .filter(|disk| disk.total_space() > 0)
        .map(|disk| {
            let used = disk.total_space().saturating_sub(disk.available_space());
            used as f64 / disk.total_space() as f64 * 100.0
        })
        .ok_or_else(|| {
            ReadingError::unavailable(format!("no filesystem mounted at {}", mount_point))
        });
    debug!("collect_usage took: {} ms", start.elapsed().as_millis());
    result
}

/// Free space of the filesystem holding `path`: the mount point that is the
/// longest prefix of it.
pub fn free_space_for(path: &Path) -> Option<u64> {
    let path = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Cumulative bytes (read, written) over the selected block devices.
pub fn collect_counters(sys: &System, allowed: &[String]) -> Result<CounterPair, ReadingError> {
    let start = Instant::now();
    let stats = sys.block_device_statistics()?;
    let mut read_sectors = 0u64;
    let mut write_sectors = 0u64;
    let mut matched = 0usize;

    for block in stats.values() {
        if !is_selected(&block.name, allowed) {
            continue;
        }
        matched += 1;
        read_sectors = read_sectors.saturating_add(block.read_sectors as u64);
        write_sectors = write_sectors.saturating_add(block.write_sectors as u64);
    }
    debug!("collect_counters took: {} ms", start.elapsed().as_millis());

    if matched == 0 {
        return Err(ReadingError::unavailable("no matching block devices"));
    }
    Ok(CounterPair(
        read_sectors.saturating_mul(SECTOR_SIZE),
        write_sectors.saturating_mul(SECTOR_SIZE),
    ))
}

/// With an allow-list, exact names only. Without one, whole disks only so
/// partitions are not counted twice.
fn is_selected(name: &str, allowed: &[String]) -> bool {
    if !allowed.is_empty() {
        return allowed.iter().any(|a| a == name);
    }
    if name.starts_with("loop") || name.starts_with("ram") || name.starts_with("zram") {
        return false;
    }
    Path::new("/sys/block").join(name).exists()
}
