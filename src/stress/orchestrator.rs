use chrono::Local;
use log::{error, info, warn};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::aggregator::{ErrorAggregator, ErrorSource};
use crate::config::StressConfig;
use crate::models::stress::{StressResult, WorkloadKind};
use crate::stress::cpu::CpuWorkload;
use crate::stress::disk::DiskWorkload;
use crate::stress::gpu::GpuWorkload;
use crate::stress::ram::RamWorkload;
use crate::stress::{RunControl, StopSignal, StressWorkload};

const MB: u64 = 1024 * 1024;

/// Triggers the stop signal when dropped, so abandoning a run stops its
/// workloads.
struct StopOnDrop(StopSignal);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.trigger();
    }
}

struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Preflight then run. Every failure ends up in `errors` and in the result.
fn run_one(
    workload: &dyn StressWorkload,
    control: &RunControl,
    errors: &ErrorAggregator,
) -> StressResult {
    let kind = workload.kind();
    let source = ErrorSource::Stress(kind);
    let ready = match workload.preflight() {
        Ok(ready) => ready,
        Err(rejected) => {
            errors.record(source, format!("rejected: {}", rejected));
            return StressResult::rejected(kind, rejected.reason);
        }
    };
    info!("Starting {} stress: {}", kind, ready.detail);

    let started_at = Local::now();
    let start = Instant::now();
    match panic::catch_unwind(AssertUnwindSafe(|| workload.run(ready, control, errors))) {
        Ok(result) => {
            info!("{} stress {} after {:.1}s", kind, result.status, result.elapsed_secs);
            result
        }
        Err(payload) => {
            let reason = format!("panicked: {}", panic_message(payload.as_ref()));
            errors.record(source, reason.clone());
            StressResult::failed(kind, started_at, start.elapsed(), reason)
        }
    }
}

pub struct StressOrchestrator {
    workloads: BTreeMap<WorkloadKind, Arc<dyn StressWorkload>>,
    errors: ErrorAggregator,
    grace: Duration,
    current: Mutex<StopSignal>,
}

impl StressOrchestrator {
    pub fn new(errors: ErrorAggregator, grace: Duration) -> Self {
        Self {
            workloads: BTreeMap::new(),
            errors,
            grace,
            current: Mutex::new(StopSignal::new()),
        }
    }

    /// All four workloads, sized from `config`.
    pub fn from_config(config: &StressConfig, errors: ErrorAggregator) -> Self {
        let mut orchestrator = Self::new(errors, config.grace());
        orchestrator.register(CpuWorkload::new(config.cpu_workers, config.cpu_matrix_size));
        orchestrator.register(RamWorkload::new(
            config.ram_test_size_mb * MB,
            config.ram_free_multiple,
            config.ram_free_fraction,
            Duration::from_millis(config.ram_pause_ms),
        ));
        orchestrator.register(DiskWorkload::new(
            config.disk_file_size_mb * MB,
            config.scratch_dir(),
            config.disk_workers,
        ));
        orchestrator.register(GpuWorkload::new(config.gpu_matrix_size));
        orchestrator
    }

    pub fn register<W: StressWorkload + 'static>(&mut self, workload: W) {
        self.workloads.insert(workload.kind(), Arc::new(workload));
    }

    /// Cancels the run in progress, if any.
    pub fn stop(&self) {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .trigger();
    }

    pub async fn run_selected(
        &self,
        kinds: &BTreeSet<WorkloadKind>,
        duration: Duration,
    ) -> BTreeMap<WorkloadKind, StressResult> {
        let stop = StopSignal::new();
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = stop.clone();
        self.run_selected_with(kinds, duration, stop).await
    }

    /// Runs every selected workload concurrently, each on its own blocking
    /// thread, and returns once all of them have returned. `stop` is
    /// triggered at `duration + grace` and when this future is dropped.
    pub async fn run_selected_with(
        &self,
        kinds: &BTreeSet<WorkloadKind>,
        duration: Duration,
        stop: StopSignal,
    ) -> BTreeMap<WorkloadKind, StressResult> {
        let _guard = StopOnDrop(stop.clone());
        let mut results = BTreeMap::new();
        let mut tasks = JoinSet::new();

        for &kind in kinds {
            let Some(workload) = self.workloads.get(&kind).cloned() else {
                self.errors
                    .record(ErrorSource::Stress(kind), "no workload registered");
                results.insert(
                    kind,
                    StressResult::failed(kind, Local::now(), Duration::ZERO, "not available"),
                );
                continue;
            };
            let errors = self.errors.clone();
            let control = RunControl::new(duration, stop.clone());
            tasks.spawn_blocking(move || {
                (kind, run_one(workload.as_ref(), &control, &errors))
            });
        }

        let hard_deadline = duration + self.grace;
        let _watchdog = {
            let stop = stop.clone();
            AbortOnDrop(tokio::spawn(async move {
                tokio::time::sleep(hard_deadline).await;
                if !stop.is_triggered() {
                    warn!(
                        "Stress run still going after {:.1}s, stopping it",
                        hard_deadline.as_secs_f64()
                    );
                    stop.trigger();
                }
            }))
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((kind, result)) => {
                    results.insert(kind, result);
                }
                Err(e) => error!("Stress task failed: {}", e),
            }
        }

        for &kind in kinds {
            results.entry(kind).or_insert_with(|| {
                self.errors
                    .record(ErrorSource::Stress(kind), "workload task did not return");
                StressResult::failed(kind, Local::now(), Duration::ZERO, "task lost")
            });
        }
        results
    }
}
