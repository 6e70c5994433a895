use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::aggregator::ErrorAggregator;
use crate::error::Rejected;
use crate::models::stress::{RunStatus, StressResult, WorkloadKind};

pub mod cpu;
pub mod disk;
pub mod gpu;
pub mod orchestrator;
pub mod ram;
#[cfg(feature = "gpu")]
pub mod wgpu_backend;

/// Longest a workload sleeps before looking at its stop signal again.
const POLL_STEP: Duration = Duration::from_millis(50);

/// What a successful preflight settled on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ready {
    /// Accepted working-set size, for workloads that have one.
    pub size_bytes: Option<u64>,
    pub detail: String,
}

impl Ready {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            size_bytes: None,
            detail: detail.into(),
        }
    }

    pub fn sized(size_bytes: u64, detail: impl Into<String>) -> Self {
        Self {
            size_bytes: Some(size_bytes),
            detail: detail.into(),
        }
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deadline plus stop signal handed to a running workload.
#[derive(Debug, Clone)]
pub struct RunControl {
    deadline: Instant,
    stop: StopSignal,
}

impl RunControl {
    pub fn new(duration: Duration, stop: StopSignal) -> Self {
        Self {
            deadline: Instant::now() + duration,
            stop,
        }
    }

    pub fn should_continue(&self) -> bool {
        !self.stop.is_triggered() && Instant::now() < self.deadline
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_triggered()
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Sleeps up to `duration`, returning early on stop or deadline.
    pub fn pause(&self, duration: Duration) {
        let until = Instant::now() + duration;
        while self.should_continue() {
            let left = until.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            thread::sleep(left.min(POLL_STEP));
        }
    }

    pub fn wait_until_done(&self) {
        while self.should_continue() {
            thread::sleep(self.remaining().min(POLL_STEP));
        }
    }

    /// `Cancelled` if a stop arrived before the deadline, `Completed` otherwise.
    pub fn finish_status(&self) -> RunStatus {
        if self.stop_requested() && Instant::now() < self.deadline {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        }
    }
}

/// One kind of synthetic load. `run` blocks the calling thread until the
/// control says to stop and reports failures through `errors`.
pub trait StressWorkload: Send + Sync {
    fn kind(&self) -> WorkloadKind;
    fn preflight(&self) -> Result<Ready, Rejected>;
    fn run(&self, ready: Ready, control: &RunControl, errors: &ErrorAggregator) -> StressResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_expires_at_deadline() {
        let control = RunControl::new(Duration::from_millis(30), StopSignal::new());
        assert!(control.should_continue());
        control.wait_until_done();
        assert!(!control.should_continue());
        assert_eq!(control.finish_status(), RunStatus::Completed);
    }

    #[test]
    fn test_stop_cancels_before_deadline() {
        let stop = StopSignal::new();
        let control = RunControl::new(Duration::from_secs(60), stop.clone());
        stop.trigger();
        assert!(!control.should_continue());
        assert_eq!(control.finish_status(), RunStatus::Cancelled);
    }

    #[test]
    fn test_pause_returns_early_on_stop() {
        let stop = StopSignal::new();
        let control = RunControl::new(Duration::from_secs(60), stop.clone());
        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stop.trigger();
        });
        let start = Instant::now();
        control.pause(Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(5));
        trigger.join().unwrap();
    }
}
