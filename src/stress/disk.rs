use chrono::Local;
use humansize::{format_size, BINARY};
use log::{debug, info};
use rand::Rng;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::aggregator::{ErrorAggregator, ErrorSource};
use crate::collectors::disk;
use crate::delta::MIB;
use crate::error::Rejected;
use crate::models::stress::{Measurements, PatternThroughput, RunStatus, StressResult, WorkloadKind};
use crate::stress::{Ready, RunControl, StressWorkload};

const KIB: usize = 1024;
const FILL_CHUNK: usize = 1024 * KIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPattern {
    pub label: &'static str,
    pub block_size: usize,
    /// Operations issued back-to-back before each data sync.
    pub queue_depth: usize,
    pub random: bool,
}

pub const PATTERNS: [AccessPattern; 4] = [
    AccessPattern {
        label: "seq_q32t1",
        block_size: 1024 * KIB,
        queue_depth: 32,
        random: false,
    },
    AccessPattern {
        label: "4k_q32t1",
        block_size: 4 * KIB,
        queue_depth: 32,
        random: true,
    },
    AccessPattern {
        label: "seq_q1t1",
        block_size: 1024 * KIB,
        queue_depth: 1,
        random: false,
    },
    AccessPattern {
        label: "4k_q1t1",
        block_size: 4 * KIB,
        queue_depth: 1,
        random: true,
    },
];

type FreeSpaceFn = Box<dyn Fn(&Path) -> Option<u64> + Send + Sync>;

/// The scratch file needs twice its size free on the target filesystem.
pub fn check_free_space(free: u64, size: u64) -> Result<(), Rejected> {
    let needed = size.saturating_mul(2);
    if free < needed {
        return Err(Rejected::new(format!(
            "{} free on scratch filesystem, {} required",
            format_size(free, BINARY),
            format_size(needed, BINARY)
        )));
    }
    Ok(())
}

pub struct DiskWorkload {
    file_size: u64,
    scratch_dir: PathBuf,
    workers: usize,
    free_space: FreeSpaceFn,
}

impl DiskWorkload {
    pub fn new(file_size: u64, scratch_dir: PathBuf, workers: usize) -> Self {
        Self {
            file_size,
            scratch_dir,
            workers: workers.max(1),
            free_space: Box::new(disk::free_space_for),
        }
    }

    pub fn with_free_space<F>(mut self, free_space: F) -> Self
    where
        F: Fn(&Path) -> Option<u64> + Send + Sync + 'static,
    {
        self.free_space = Box::new(free_space);
        self
    }

    fn fail(
        &self,
        errors: &ErrorAggregator,
        started: (chrono::DateTime<Local>, Instant),
        reason: String,
    ) -> StressResult {
        errors.record(ErrorSource::Stress(WorkloadKind::Disk), reason.clone());
        StressResult::failed(WorkloadKind::Disk, started.0, started.1.elapsed(), reason)
    }
}

fn prefill(file: &mut File, size: u64, control: &RunControl) -> io::Result<()> {
    let chunk = vec![0x5Au8; FILL_CHUNK];
    let mut written = 0u64;
    while written < size && !control.stop_requested() {
        let n = (size - written).min(FILL_CHUNK as u64) as usize;
        file.write_all(&chunk[..n])?;
        written += n as u64;
    }
    file.sync_all()
}

fn mib_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        0.0
    } else {
        bytes as f64 / MIB / elapsed.as_secs_f64()
    }
}

/// Alternating write and read batches against `path` on its own handle until
/// the control expires.
fn run_pattern(
    path: &Path,
    file_size: u64,
    pattern: &AccessPattern,
    control: &RunControl,
) -> io::Result<PatternThroughput> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let block = pattern.block_size as u64;
    let blocks = file_size / block;
    if blocks == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("scratch file smaller than one {} block", pattern.label),
        ));
    }
    let batch = (pattern.queue_depth as u64).min(blocks);

    let mut rng = rand::thread_rng();
    let mut buf = vec![0xA5u8; pattern.block_size];
    let mut next = 0u64;
    let mut offsets = Vec::with_capacity(batch as usize);
    let (mut write_time, mut read_time) = (Duration::ZERO, Duration::ZERO);
    let mut passes = 0u64;

    while control.should_continue() {
        offsets.clear();
        for _ in 0..batch {
            let index = if pattern.random {
                rng.gen_range(0..blocks)
            } else {
                let index = next % blocks;
                next += 1;
                index
            };
            offsets.push(index * block);
        }

        let t = Instant::now();
        for &offset in &offsets {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&buf)?;
        }
        file.sync_data()?;
        write_time += t.elapsed();

        let t = Instant::now();
        for &offset in &offsets {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
        }
        read_time += t.elapsed();
        passes += 1;
    }

    let moved = passes * batch * block;
    debug!("{}: {} passes", pattern.label, passes);
    Ok(PatternThroughput {
        label: pattern.label.to_string(),
        read_mibs: mib_per_sec(moved, read_time),
        write_mibs: mib_per_sec(moved, write_time),
        passes,
    })
}

impl StressWorkload for DiskWorkload {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Disk
    }

    fn preflight(&self) -> Result<Ready, Rejected> {
        let free = (self.free_space)(&self.scratch_dir).ok_or_else(|| {
            Rejected::new(format!(
                "cannot determine free space in {}",
                self.scratch_dir.display()
            ))
        })?;
        check_free_space(free, self.file_size)?;
        Ok(Ready::sized(
            self.file_size,
            format!(
                "{} scratch file in {}",
                format_size(self.file_size, BINARY),
                self.scratch_dir.display()
            ),
        ))
    }

    fn run(&self, ready: Ready, control: &RunControl, errors: &ErrorAggregator) -> StressResult {
        let started = (Local::now(), Instant::now());
        let size = ready.size_bytes.unwrap_or(self.file_size);

        // Removed when dropped, whichever way we leave.
        let mut scratch = match tempfile::Builder::new()
            .prefix("stressmon-")
            .suffix(".dat")
            .tempfile_in(&self.scratch_dir)
        {
            Ok(file) => file,
            Err(e) => {
                return self.fail(
                    errors,
                    started,
                    format!(
                        "cannot create scratch file in {}: {}",
                        self.scratch_dir.display(),
                        e
                    ),
                )
            }
        };
        if let Err(e) = prefill(scratch.as_file_mut(), size, control) {
            return self.fail(errors, started, format!("pre-fill failed: {}", e));
        }

        let pool = match ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("disk-stress-{}", i))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                return self.fail(errors, started, format!("cannot build worker pool: {}", e))
            }
        };

        info!(
            "Disk stress running {} patterns on {} threads",
            PATTERNS.len(),
            self.workers
        );
        let path = scratch.path().to_path_buf();
        let patterns = PATTERNS;
        let outcomes: Vec<(&AccessPattern, io::Result<PatternThroughput>)> = pool.install(|| {
            patterns
                .par_iter()
                .map(|pattern| (pattern, run_pattern(&path, size, pattern, control)))
                .collect()
        });

        let mut throughput = Vec::with_capacity(outcomes.len());
        for (pattern, outcome) in outcomes {
            match outcome {
                Ok(t) => throughput.push(t),
                Err(e) => errors.record(
                    ErrorSource::Stress(WorkloadKind::Disk),
                    format!("{} failed: {}", pattern.label, e),
                ),
            }
        }

        if let Err(e) = scratch.close() {
            errors.record(
                ErrorSource::Stress(WorkloadKind::Disk),
                format!("cannot remove scratch file: {}", e),
            );
        }

        let status = if throughput.is_empty() {
            RunStatus::Failed("every access pattern failed".to_string())
        } else {
            control.finish_status()
        };
        StressResult::new(
            WorkloadKind::Disk,
            started.0,
            started.1.elapsed(),
            status,
            Measurements::Disk(throughput),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stress::StopSignal;
    use std::fs;
    use tempfile::tempdir;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_check_free_space() {
        assert!(check_free_space(200 * MB, 100 * MB).is_ok());
        assert!(check_free_space(199 * MB, 100 * MB).is_err());
    }

    #[test]
    fn test_preflight_rejects_small_filesystem() {
        let workload = DiskWorkload::new(100 * MB, PathBuf::from("/tmp"), 4)
            .with_free_space(|_| Some(150 * MB));
        assert!(workload.preflight().is_err());

        let workload = DiskWorkload::new(100 * MB, PathBuf::from("/tmp"), 4)
            .with_free_space(|_| Some(500 * MB));
        assert_eq!(workload.preflight().unwrap().size_bytes, Some(100 * MB));
    }

    #[test]
    fn test_patterns() {
        let labels: Vec<_> = PATTERNS.iter().map(|p| p.label).collect();
        assert_eq!(labels, vec!["seq_q32t1", "4k_q32t1", "seq_q1t1", "4k_q1t1"]);
        assert!(PATTERNS.iter().filter(|p| p.random).all(|p| p.block_size == 4096));
    }

    #[test]
    fn test_run_removes_scratch_file() {
        let dir = tempdir().unwrap();
        let workload = DiskWorkload::new(2 * MB, dir.path().to_path_buf(), 4)
            .with_free_space(|_| Some(u64::MAX));
        let errors = ErrorAggregator::new();
        let control = RunControl::new(Duration::from_millis(300), StopSignal::new());

        let result = workload.run(workload.preflight().unwrap(), &control, &errors);

        assert_eq!(result.status, RunStatus::Completed, "errors: {:?}", errors.snapshot());
        let Measurements::Disk(patterns) = &result.measurements else {
            panic!("expected disk measurements");
        };
        assert_eq!(patterns.len(), 4);
        assert!(patterns.iter().all(|p| p.passes >= 1 && p.write_mibs > 0.0));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_stop_still_removes_scratch_file() {
        let dir = tempdir().unwrap();
        let workload = DiskWorkload::new(2 * MB, dir.path().to_path_buf(), 2);
        let stop = StopSignal::new();
        stop.trigger();
        let control = RunControl::new(Duration::from_secs(60), stop);

        let result = workload.run(
            Ready::sized(2 * MB, ""),
            &control,
            &ErrorAggregator::new(),
        );

        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_scratch_dir_fails() {
        let workload = DiskWorkload::new(MB, PathBuf::from("/nonexistent/stressmon"), 1);
        let errors = ErrorAggregator::new();
        let control = RunControl::new(Duration::from_millis(50), StopSignal::new());

        let result = workload.run(Ready::default(), &control, &errors);

        assert!(matches!(result.status, RunStatus::Failed(_)));
        assert_eq!(errors.len(), 1);
    }
}
