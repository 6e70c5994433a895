use chrono::Local;
use humansize::{format_size, BINARY};
use log::{debug, info};
use rand::Rng;
use std::hint::black_box;
use std::time::{Duration, Instant};

use crate::aggregator::{ErrorAggregator, ErrorSource};
use crate::collectors::memory;
use crate::delta::MIB;
use crate::error::Rejected;
use crate::models::stress::{Measurements, RamMeasurements, StressResult, WorkloadKind};
use crate::stress::{Ready, RunControl, StressWorkload};

/// Random accesses per iteration, capped by the buffer length.
const RANDOM_BATCH: usize = 1 << 20;
const WORD: u64 = std::mem::size_of::<u64>() as u64;

type FreeMemoryFn = Box<dyn Fn() -> Option<u64> + Send + Sync>;

/// Rejects when `free < multiple * requested`, otherwise accepts
/// `min(requested, fraction * free)`. A plan smaller than one word is
/// rejected too.
pub fn plan_test_size(
    free: u64,
    requested: u64,
    multiple: f64,
    fraction: f64,
) -> Result<u64, Rejected> {
    let needed = requested as f64 * multiple;
    if (free as f64) < needed {
        return Err(Rejected::new(format!(
            "{} of free memory, {} required",
            format_size(free, BINARY),
            format_size(needed.ceil() as u64, BINARY)
        )));
    }
    let size = requested.min((free as f64 * fraction) as u64);
    if size < WORD {
        return Err(Rejected::new(format!(
            "test size of {} is below one word",
            format_size(size, BINARY)
        )));
    }
    Ok(size)
}

pub struct RamWorkload {
    requested_bytes: u64,
    free_multiple: f64,
    free_fraction: f64,
    pause: Duration,
    free_memory: FreeMemoryFn,
}

impl RamWorkload {
    pub fn new(
        requested_bytes: u64,
        free_multiple: f64,
        free_fraction: f64,
        pause: Duration,
    ) -> Self {
        Self {
            requested_bytes,
            free_multiple,
            free_fraction,
            pause,
            free_memory: Box::new(memory::available_bytes),
        }
    }

    pub fn with_free_memory<F>(mut self, free_memory: F) -> Self
    where
        F: Fn() -> Option<u64> + Send + Sync + 'static,
    {
        self.free_memory = Box::new(free_memory);
        self
    }
}

#[derive(Default)]
struct Totals {
    iterations: u64,
    seq_speed: f64,
    seq_latency: f64,
    rand_speed: f64,
    rand_latency: f64,
}

impl Totals {
    fn average(&self, size: u64) -> RamMeasurements {
        let n = self.iterations.max(1) as f64;
        RamMeasurements {
            test_size_bytes: size,
            iterations: self.iterations,
            seq_speed_mibs: self.seq_speed / n,
            seq_latency_ms: self.seq_latency / n,
            rand_speed_mibs: self.rand_speed / n,
            rand_latency_ms: self.rand_latency / n,
        }
    }
}

/// MiB/s and milliseconds per access.
fn rates(bytes: u64, accesses: u64, elapsed: Duration) -> (f64, f64) {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    (bytes as f64 / MIB / secs, secs * 1000.0 / accesses.max(1) as f64)
}

impl StressWorkload for RamWorkload {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Ram
    }

    fn preflight(&self) -> Result<Ready, Rejected> {
        let free = (self.free_memory)()
            .ok_or_else(|| Rejected::new("free memory could not be determined"))?;
        let size = plan_test_size(
            free,
            self.requested_bytes,
            self.free_multiple,
            self.free_fraction,
        )?;
        Ok(Ready::sized(
            size,
            format!("{} test buffer", format_size(size, BINARY)),
        ))
    }

    fn run(&self, ready: Ready, control: &RunControl, errors: &ErrorAggregator) -> StressResult {
        let started_at = Local::now();
        let start = Instant::now();
        let size = ready.size_bytes.unwrap_or(self.requested_bytes);
        let words = ((size / WORD) as usize).max(1);
        info!("RAM stress running with {}", format_size(words as u64 * WORD, BINARY));

        let mut rng = rand::thread_rng();
        let mut totals = Totals::default();

        while control.should_continue() {
            let mut buffer: Vec<u64> = Vec::new();
            if let Err(e) = buffer.try_reserve_exact(words) {
                errors.record(
                    ErrorSource::Stress(WorkloadKind::Ram),
                    format!("allocation failed: {}", e),
                );
                return StressResult::failed(
                    WorkloadKind::Ram,
                    started_at,
                    start.elapsed(),
                    e.to_string(),
                );
            }
            buffer.resize(words, 0);

            let t = Instant::now();
            for (i, word) in buffer.iter_mut().enumerate() {
                *word = i as u64;
            }
            black_box(&buffer);
            let (speed, latency) = rates(words as u64 * WORD, words as u64, t.elapsed());
            totals.seq_speed += speed;
            totals.seq_latency += latency;

            let ops = words.min(RANDOM_BATCH);
            let mut checksum = 0u64;
            let t = Instant::now();
            for _ in 0..ops {
                let w = rng.gen_range(0..words);
                buffer[w] = buffer[w].wrapping_add(1);
                let r = rng.gen_range(0..words);
                checksum = checksum.wrapping_add(buffer[r]);
            }
            black_box(checksum);
            let (speed, latency) =
                rates(ops as u64 * WORD * 2, ops as u64 * 2, t.elapsed());
            totals.rand_speed += speed;
            totals.rand_latency += latency;

            totals.iterations += 1;
            drop(buffer);
            debug!("RAM iteration {} done", totals.iterations);
            control.pause(self.pause);
        }

        StressResult::new(
            WorkloadKind::Ram,
            started_at,
            start.elapsed(),
            control.finish_status(),
            Measurements::Ram(totals.average(words as u64 * WORD)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stress::RunStatus;
    use crate::stress::StopSignal;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_plan_rejects_below_multiple() {
        assert!(plan_test_size(100 * MB, 100 * MB, 1.5, 0.5).is_err());
        assert!(plan_test_size(149 * MB, 100 * MB, 1.5, 0.5).is_err());
    }

    #[test]
    fn test_plan_compares_without_truncating() {
        // 67 * 1.5 = 100.5, so 100 bytes free is not enough.
        assert!(plan_test_size(100, 67, 1.5, 0.5).is_err());
        assert_eq!(plan_test_size(101, 67, 1.5, 0.5), Ok(50));
    }

    #[test]
    fn test_plan_rejects_sizes_below_one_word() {
        assert!(plan_test_size(1, 1, 1.5, 0.5).is_err());
        assert!(plan_test_size(64 * MB, 0, 1.5, 0.5).is_err());
        assert!(plan_test_size(10, 4, 1.5, 0.5).is_err());
        assert_eq!(plan_test_size(64, 8, 1.5, 0.5), Ok(8));
    }

    #[test]
    fn test_plan_caps_at_fraction_of_free() {
        assert_eq!(plan_test_size(300 * MB, 100 * MB, 1.5, 0.5), Ok(100 * MB));
        assert_eq!(plan_test_size(160 * MB, 100 * MB, 1.5, 0.5), Ok(80 * MB));
    }

    #[test]
    fn test_preflight_uses_free_memory() {
        let workload =
            RamWorkload::new(64 * MB, 1.5, 0.5, Duration::ZERO).with_free_memory(|| Some(32 * MB));
        let rejected = workload.preflight().unwrap_err();
        assert!(rejected.reason.contains("required"));

        let unknown = RamWorkload::new(MB, 1.5, 0.5, Duration::ZERO).with_free_memory(|| None);
        assert!(unknown.preflight().is_err());
    }

    #[test]
    fn test_run_measures_both_patterns() {
        let workload = RamWorkload::new(MB, 1.5, 0.5, Duration::from_millis(10))
            .with_free_memory(|| Some(64 * MB));
        let ready = workload.preflight().unwrap();
        assert_eq!(ready.size_bytes, Some(MB));

        let errors = ErrorAggregator::new();
        let control = RunControl::new(Duration::from_millis(200), StopSignal::new());
        let result = workload.run(ready, &control, &errors);

        assert_eq!(result.status, RunStatus::Completed);
        let Measurements::Ram(m) = result.measurements else {
            panic!("expected RAM measurements");
        };
        assert!(m.iterations >= 1);
        assert_eq!(m.test_size_bytes, MB);
        assert!(m.seq_speed_mibs > 0.0);
        assert!(m.rand_speed_mibs > 0.0);
        assert!(m.rand_latency_ms > 0.0);
        assert!(errors.is_empty());
    }
}
