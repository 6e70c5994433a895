use log::debug;
use std::cmp::Ordering;
use std::time::Instant;
use sysinfo::{ProcessesToUpdate, System as SysInfo};

use crate::error::ReadingError;
use crate::models::system::ProcessInfo;

/// Top `count` processes by CPU. CPU figures are relative to the previous
/// refresh of `sys`.
pub fn collect_processes(
    sys: &mut SysInfo,
    count: usize,
) -> Result<Vec<ProcessInfo>, ReadingError> {
    let start = Instant::now();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    let total_memory = sys.total_memory();
    if total_memory == 0 {
        return Err(ReadingError::unavailable("total memory reported as 0"));
    }

    let processes: Vec<ProcessInfo> = sys
        .processes()
        .iter()
        .map(|(pid, process)| ProcessInfo {
            pid: pid.as_u32(),
            name: process.name().to_string_lossy().into_owned(),
            cpu_percent: process.cpu_usage(),
            memory_percent: (process.memory() as f64 / total_memory as f64 * 100.0) as f32,
        })
        .collect();

    let result = top_by_cpu(processes, count);
    debug!("collect_processes took: {} ms", start.elapsed().as_millis());
    Ok(result)
}

pub fn top_by_cpu(mut processes: Vec<ProcessInfo>, count: usize) -> Vec<ProcessInfo> {
    processes.sort_by(|a, b| {
        b.cpu_percent
            .partial_cmp(&a.cpu_percent)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.pid.cmp(&b.pid))
    });
    processes.truncate(count);
    processes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(pid: u32, cpu: f32) -> ProcessInfo {
        ProcessInfo {
            pid,
            name: format!("p{}", pid),
            cpu_percent: cpu,
            memory_percent: 1.0,
        }
    }

    #[test]
    fn test_top_by_cpu_orders_descending() {
        let top = top_by_cpu(
            vec![process(1, 3.0), process(2, 90.0), process(3, 12.5), process(4, 0.0)],
            3,
        );
        let pids: Vec<u32> = top.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![2, 3, 1]);
    }

    #[test]
    fn test_top_by_cpu_fewer_than_count() {
        assert_eq!(top_by_cpu(vec![process(9, 1.0)], 5).len(), 1);
    }
}
