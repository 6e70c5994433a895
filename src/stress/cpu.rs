use chrono::Local;
use log::{debug, info, warn};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::hint::black_box;
use std::io::{self, Read};
use std::thread;
use std::time::Instant;
use subprocess::{Popen, PopenConfig, Redirection};

use crate::aggregator::{ErrorAggregator, ErrorSource};
use crate::error::Rejected;
use crate::models::stress::{CpuMeasurements, Measurements, StressResult, WorkloadKind};
use crate::stress::{Ready, RunControl, StressWorkload};

/// Hidden subcommand a worker process is started with.
pub const WORKER_SUBCOMMAND: &str = "cpu-worker";

fn null_device() -> io::Result<File> {
    OpenOptions::new().write(true).open("/dev/null")
}

/// Child processes that are killed and reaped no later than drop.
///
/// Each child's stdin is a pipe whose write end only this process holds. It
/// closes when this process exits for any reason, including SIGKILL, and a
/// worker exits on seeing EOF there.
#[derive(Default)]
struct WorkerPool {
    children: Vec<Popen>,
}

impl WorkerPool {
    fn spawn(&mut self, argv: &[OsString]) -> Result<(), subprocess::PopenError> {
        let child = Popen::create(
            argv,
            PopenConfig {
                stdin: Redirection::Pipe,
                stdout: Redirection::File(null_device()?),
                ..Default::default()
            },
        )?;
        debug!("Started CPU worker pid {:?}", child.pid());
        self.children.push(child);
        Ok(())
    }

    fn len(&self) -> usize {
        self.children.len()
    }

    fn active(&mut self) -> usize {
        self.children
            .iter_mut()
            .map(|c| c.poll().is_none())
            .filter(|alive| *alive)
            .count()
    }

    /// Kills whatever is still running and waits for every child. Returns how
    /// many were reaped.
    fn shutdown(&mut self) -> usize {
        let mut reaped = 0;
        for mut child in self.children.drain(..) {
            drop(child.stdin.take());
            if child.poll().is_none() {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill CPU worker {:?}: {}", child.pid(), e);
                }
            }
            match child.wait() {
                Ok(status) => {
                    debug!("CPU worker {:?} exited: {:?}", child.pid(), status);
                    reaped += 1;
                }
                Err(e) => warn!("Failed to reap CPU worker {:?}: {}", child.pid(), e),
            }
        }
        reaped
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.children.is_empty() {
            self.shutdown();
        }
    }
}

/// Saturates every core with one matrix-multiplying process each.
pub struct CpuWorkload {
    workers: usize,
    argv: Vec<OsString>,
}

impl CpuWorkload {
    /// `workers == 0` means one per logical core. Workers re-execute this
    /// binary.
    pub fn new(workers: usize, matrix_size: usize) -> Self {
        let program = std::env::current_exe()
            .map(OsString::from)
            .unwrap_or_else(|_| OsString::from("stressmon"));
        let args = vec![
            OsString::from(WORKER_SUBCOMMAND),
            OsString::from("--matrix-size"),
            OsString::from(matrix_size.to_string()),
        ];
        Self::with_command(workers, program, args)
    }

    pub fn with_command(
        workers: usize,
        program: impl Into<OsString>,
        args: Vec<OsString>,
    ) -> Self {
        let workers = if workers == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            workers
        };
        let mut argv = vec![program.into()];
        argv.extend(args);
        Self { workers, argv }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl StressWorkload for CpuWorkload {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Cpu
    }

    fn preflight(&self) -> Result<Ready, Rejected> {
        Ok(Ready::new(format!("{} worker processes", self.workers)))
    }

    fn run(&self, _ready: Ready, control: &RunControl, errors: &ErrorAggregator) -> StressResult {
        let started_at = Local::now();
        let start = Instant::now();
        let mut pool = WorkerPool::default();

        for i in 0..self.workers {
            if let Err(e) = pool.spawn(&self.argv) {
                errors.record(
                    ErrorSource::Stress(WorkloadKind::Cpu),
                    format!("worker {} failed to start: {}", i, e),
                );
            }
        }
        let spawned = pool.len();
        if spawned == 0 {
            return StressResult::failed(
                WorkloadKind::Cpu,
                started_at,
                start.elapsed(),
                "no worker process could be started",
            );
        }
        info!("CPU stress running with {} workers", spawned);

        control.wait_until_done();
        let active = pool.active();
        let status = control.finish_status();
        let reaped = pool.shutdown();
        if active < spawned {
            errors.record(
                ErrorSource::Stress(WorkloadKind::Cpu),
                format!("{} of {} workers exited early", spawned - active, spawned),
            );
        }

        StressResult::new(
            WorkloadKind::Cpu,
            started_at,
            start.elapsed(),
            status,
            Measurements::Cpu(CpuMeasurements {
                workers_spawned: spawned,
                workers_active: active,
                workers_reaped: reaped,
            }),
        )
    }
}

/// `out = a × b` for row-major `n × n` matrices.
pub fn multiply(a: &[f64], b: &[f64], n: usize, out: &mut [f64]) {
    out.iter_mut().for_each(|v| *v = 0.0);
    for i in 0..n {
        for k in 0..n {
            let aik = a[i * n + k];
            let row = &b[k * n..(k + 1) * n];
            let dst = &mut out[i * n..(i + 1) * n];
            for (d, bkj) in dst.iter_mut().zip(row) {
                *d += aik * bkj;
            }
        }
    }
}

/// Calls `on_close` once `input` reaches EOF or fails to read.
fn watch_input<R, F>(mut input: R, on_close: F) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; 64];
        loop {
            match input.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        on_close();
    })
}

/// Body of a worker process: multiplies until killed, or until stdin closes
/// because the parent is gone.
pub fn run_cpu_worker(matrix_size: usize) -> ! {
    watch_input(io::stdin(), || std::process::exit(0));
    let n = matrix_size.max(1);
    let a: Vec<f64> = (0..n * n).map(|i| (i % 7) as f64 + 0.5).collect();
    let b: Vec<f64> = (0..n * n).map(|i| (i % 5) as f64 - 1.5).collect();
    let mut out = vec![0.0; n * n];
    loop {
        multiply(black_box(&a), black_box(&b), n, &mut out);
        black_box(&out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stress::RunStatus;
    use crate::stress::StopSignal;
    use std::time::Duration;

    fn sleepers(workers: usize) -> CpuWorkload {
        CpuWorkload::with_command(workers, "sleep", vec![OsString::from("30")])
    }

    #[test]
    fn test_multiply() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut out = [0.0; 4];
        multiply(&a, &b, 2, &mut out);
        assert_eq!(out, [19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_zero_workers_means_one_per_core() {
        assert!(CpuWorkload::new(0, 8).workers() >= 1);
        assert_eq!(CpuWorkload::new(3, 8).workers(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_workers_are_killed_and_reaped_at_deadline() {
        let workload = sleepers(3);
        let errors = ErrorAggregator::new();
        let control = RunControl::new(Duration::from_millis(200), StopSignal::new());

        let result = workload.run(workload.preflight().unwrap(), &control, &errors);

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(
            result.measurements,
            Measurements::Cpu(CpuMeasurements {
                workers_spawned: 3,
                workers_active: 3,
                workers_reaped: 3,
            })
        );
        assert!(errors.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_cancels_the_run() {
        let workload = sleepers(2);
        let errors = ErrorAggregator::new();
        let stop = StopSignal::new();
        let control = RunControl::new(Duration::from_secs(60), stop.clone());

        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            stop.trigger();
        });
        let result = workload.run(Ready::default(), &control, &errors);
        trigger.join().unwrap();

        assert_eq!(result.status, RunStatus::Cancelled);
        assert!(result.elapsed_secs < 10.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_drop_kills_workers() {
        let mut pool = WorkerPool::default();
        pool.spawn(&[OsString::from("sleep"), OsString::from("30")]).unwrap();
        let start = Instant::now();
        drop(pool);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_workers_exit_when_their_input_closes() {
        // `cat` stands in for a worker: it exits on EOF, as workers do once
        // the pool's process is gone and the pipe's write end with it.
        let mut pool = WorkerPool::default();
        pool.spawn(&[OsString::from("cat")]).unwrap();
        pool.spawn(&[OsString::from("cat")]).unwrap();
        assert_eq!(pool.active(), 2);

        for child in pool.children.iter_mut() {
            drop(child.stdin.take());
        }
        for child in pool.children.iter_mut() {
            let status = child.wait_timeout(Duration::from_secs(10)).unwrap();
            assert!(status.is_some_and(|s| s.success()));
        }
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn test_watch_input_fires_on_eof() {
        let (tx, rx) = std::sync::mpsc::channel();
        let watcher = watch_input(io::Cursor::new(b"ignored".to_vec()), move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        watcher.join().unwrap();
    }

    #[test]
    fn test_missing_program_fails() {
        let workload =
            CpuWorkload::with_command(2, "/nonexistent/stressmon-worker", Vec::new());
        let errors = ErrorAggregator::new();
        let control = RunControl::new(Duration::from_millis(50), StopSignal::new());

        let result = workload.run(Ready::default(), &control, &errors);

        assert!(matches!(result.status, RunStatus::Failed(_)));
        assert_eq!(errors.len(), 2);
    }
}
