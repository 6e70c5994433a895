use chrono::Local;
use log::{debug, info};
use std::time::Instant;

use crate::aggregator::{ErrorAggregator, ErrorSource};
use crate::error::{GpuError, Rejected};
use crate::models::stress::{GpuMeasurements, Measurements, RunStatus, StressResult, WorkloadKind};
use crate::stress::{Ready, RunControl, StressWorkload};

/// A way to reach a compute device.
pub trait ComputeBackend: Send + Sync {
    /// Name of the device that `open` would use, if there is one.
    fn discover(&self) -> Option<String>;
    fn open(&self, matrix_size: u32) -> Result<Box<dyn ComputeSession>, GpuError>;
}

/// An opened device with the kernel and buffers ready.
pub trait ComputeSession {
    /// Submits one matrix multiplication and blocks until it has finished.
    fn dispatch_and_wait(&mut self) -> Result<(), GpuError>;
}

/// Used when the crate is built without GPU support.
pub struct NoBackend;

impl ComputeBackend for NoBackend {
    fn discover(&self) -> Option<String> {
        None
    }

    fn open(&self, _matrix_size: u32) -> Result<Box<dyn ComputeSession>, GpuError> {
        Err(GpuError::NoDevice)
    }
}

#[cfg(feature = "gpu")]
pub fn default_backend() -> Box<dyn ComputeBackend> {
    Box::new(crate::stress::wgpu_backend::WgpuBackend)
}

#[cfg(not(feature = "gpu"))]
pub fn default_backend() -> Box<dyn ComputeBackend> {
    Box::new(NoBackend)
}

pub struct GpuWorkload {
    backend: Box<dyn ComputeBackend>,
    matrix_size: u32,
}

impl GpuWorkload {
    pub fn new(matrix_size: u32) -> Self {
        Self::with_backend(default_backend(), matrix_size)
    }

    pub fn with_backend(backend: Box<dyn ComputeBackend>, matrix_size: u32) -> Self {
        Self {
            backend,
            matrix_size: matrix_size.max(1),
        }
    }
}

impl StressWorkload for GpuWorkload {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Gpu
    }

    fn preflight(&self) -> Result<Ready, Rejected> {
        match self.backend.discover() {
            Some(device) => Ok(Ready::new(device)),
            None => Err(Rejected::new("no compatible compute device found")),
        }
    }

    fn run(&self, ready: Ready, control: &RunControl, errors: &ErrorAggregator) -> StressResult {
        let started_at = Local::now();
        let start = Instant::now();
        let device = ready.detail;

        let mut session = match self.backend.open(self.matrix_size) {
            Ok(session) => session,
            Err(e) => {
                errors.record(ErrorSource::Stress(WorkloadKind::Gpu), e.to_string());
                return StressResult::failed(
                    WorkloadKind::Gpu,
                    started_at,
                    start.elapsed(),
                    e.to_string(),
                );
            }
        };
        info!(
            "GPU stress running {0}x{0} matrix multiplications on {1}",
            self.matrix_size, device
        );

        let mut dispatches = 0u64;
        while control.should_continue() {
            if let Err(e) = session.dispatch_and_wait() {
                errors.record(ErrorSource::Stress(WorkloadKind::Gpu), e.to_string());
                return StressResult::new(
                    WorkloadKind::Gpu,
                    started_at,
                    start.elapsed(),
                    RunStatus::Failed(e.to_string()),
                    Measurements::Gpu(GpuMeasurements { device, dispatches }),
                );
            }
            dispatches += 1;
        }
        debug!("GPU stress finished after {} dispatches", dispatches);

        StressResult::new(
            WorkloadKind::Gpu,
            started_at,
            start.elapsed(),
            control.finish_status(),
            Measurements::Gpu(GpuMeasurements { device, dispatches }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stress::StopSignal;
    use std::thread;
    use std::time::Duration;

    struct FakeBackend {
        open_fails: bool,
    }

    struct FakeSession;

    impl ComputeSession for FakeSession {
        fn dispatch_and_wait(&mut self) -> Result<(), GpuError> {
            thread::sleep(Duration::from_millis(1));
            Ok(())
        }
    }

    impl ComputeBackend for FakeBackend {
        fn discover(&self) -> Option<String> {
            Some("Fake GPU".to_string())
        }

        fn open(&self, _matrix_size: u32) -> Result<Box<dyn ComputeSession>, GpuError> {
            if self.open_fails {
                Err(GpuError::Open("device lost".to_string()))
            } else {
                Ok(Box::new(FakeSession))
            }
        }
    }

    #[test]
    fn test_no_backend_is_rejected() {
        let workload = GpuWorkload::with_backend(Box::new(NoBackend), 64);
        assert!(workload.preflight().is_err());
    }

    #[test]
    fn test_dispatches_until_deadline() {
        let workload = GpuWorkload::with_backend(Box::new(FakeBackend { open_fails: false }), 64);
        let errors = ErrorAggregator::new();
        let control = RunControl::new(Duration::from_millis(50), StopSignal::new());

        let result = workload.run(workload.preflight().unwrap(), &control, &errors);

        assert_eq!(result.status, RunStatus::Completed);
        let Measurements::Gpu(m) = result.measurements else {
            panic!("expected GPU measurements");
        };
        assert_eq!(m.device, "Fake GPU");
        assert!(m.dispatches > 0);
    }

    #[test]
    fn test_open_failure_is_recorded() {
        let workload = GpuWorkload::with_backend(Box::new(FakeBackend { open_fails: true }), 64);
        let errors = ErrorAggregator::new();
        let control = RunControl::new(Duration::from_millis(50), StopSignal::new());

        let result = workload.run(workload.preflight().unwrap(), &control, &errors);

        assert!(matches!(result.status, RunStatus::Failed(_)));
        assert_eq!(result.measurements, Measurements::None);
        assert_eq!(errors.len(), 1);
    }
}
