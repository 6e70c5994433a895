use log::{debug, error, info, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::aggregator::ErrorAggregator;
use crate::collectors::TelemetrySource;
use crate::config::DiagnosticsConfig;
use crate::diagnostics;
use crate::models::Tick;
use crate::sampler::MetricSampler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoopState::Idle => "idle",
            LoopState::Running => "running",
            LoopState::Stopping => "stopping",
            LoopState::Stopped => "stopped",
        })
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("sampling loop cannot start: it is {0}")]
pub struct NotIdle(pub LoopState);

/// Receives every delivered tick, on the sampling task.
pub trait MetricsConsumer: Send + 'static {
    fn on_tick(&mut self, tick: &Tick);
}

impl<F> MetricsConsumer for F
where
    F: FnMut(&Tick) + Send + 'static,
{
    fn on_tick(&mut self, tick: &Tick) {
        self(tick)
    }
}

impl MetricsConsumer for mpsc::UnboundedSender<Tick> {
    fn on_tick(&mut self, tick: &Tick) {
        if self.send(tick.clone()).is_err() {
            debug!("Tick receiver dropped");
        }
    }
}

fn lock(state: &Mutex<LoopState>) -> MutexGuard<'_, LoopState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drives a `MetricSampler` on a background task at a fixed interval.
pub struct SamplingLoop<S> {
    state: Arc<Mutex<LoopState>>,
    wake: Arc<Notify>,
    errors: ErrorAggregator,
    thresholds: DiagnosticsConfig,
    sampler: Option<MetricSampler<S>>,
    handle: Option<JoinHandle<()>>,
}

impl<S: TelemetrySource + 'static> SamplingLoop<S> {
    pub fn new(
        sampler: MetricSampler<S>,
        errors: ErrorAggregator,
        thresholds: DiagnosticsConfig,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopState::Idle)),
            wake: Arc::new(Notify::new()),
            errors,
            thresholds,
            sampler: Some(sampler),
            handle: None,
        }
    }

    pub fn state(&self) -> LoopState {
        *lock(&self.state)
    }

    /// Spawns the loop on the current tokio runtime.
    pub fn start<C: MetricsConsumer>(
        &mut self,
        interval: Duration,
        consumer: C,
    ) -> Result<(), NotIdle> {
        let sampler = {
            let mut state = lock(&self.state);
            if *state != LoopState::Idle {
                return Err(NotIdle(*state));
            }
            let sampler = self.sampler.take().ok_or(NotIdle(*state))?;
            *state = LoopState::Running;
            sampler
        };

        info!("Sampling every {} ms", interval.as_millis());
        self.handle = Some(tokio::spawn(run_loop(
            sampler,
            consumer,
            interval,
            self.state.clone(),
            self.wake.clone(),
            self.errors.clone(),
            self.thresholds.clone(),
        )));
        Ok(())
    }

    /// Once this returns no further tick is delivered.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        match *state {
            LoopState::Running => *state = LoopState::Stopping,
            LoopState::Idle => *state = LoopState::Stopped,
            LoopState::Stopping | LoopState::Stopped => {}
        }
        drop(state);
        self.wake.notify_one();
    }

    /// Waits for the background task to finish. Call `stop` first.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Sampling task failed: {}", e);
                *lock(&self.state) = LoopState::Stopped;
            }
        }
    }
}

impl<S> Drop for SamplingLoop<S> {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if *state == LoopState::Running {
            *state = LoopState::Stopping;
        }
        drop(state);
        self.wake.notify_one();
    }
}

fn is_running(state: &Mutex<LoopState>) -> bool {
    *lock(state) == LoopState::Running
}

async fn run_loop<S: TelemetrySource, C: MetricsConsumer>(
    mut sampler: MetricSampler<S>,
    mut consumer: C,
    interval: Duration,
    state: Arc<Mutex<LoopState>>,
    wake: Arc<Notify>,
    errors: ErrorAggregator,
    thresholds: DiagnosticsConfig,
) {
    let mut ticks = 0u64;
    while is_running(&state) {
        let (snapshot, tick_errors) = sampler.sample().await;
        errors.extend(tick_errors);
        let alerts = diagnostics::check(&snapshot, &thresholds);
        for alert in &alerts {
            warn!("{}", alert);
        }
        let tick = Tick {
            snapshot,
            errors: errors.snapshot(),
            alerts,
        };

        {
            let state = lock(&state);
            if *state != LoopState::Running {
                break;
            }
            consumer.on_tick(&tick);
        }
        ticks += 1;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wake.notified() => {}
        }
    }

    *lock(&state) = LoopState::Stopped;
    info!("Sampling loop stopped after {} ticks", ticks);
}
