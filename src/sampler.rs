use log::debug;
use std::time::Instant;

use crate::aggregator::{ErrorRecord, ErrorSource};
use crate::collectors::TelemetrySource;
use crate::delta::{CounterDelta, CounterDeltaTracker, CounterFamily};
use crate::error::ReadingError;
use crate::models::cpu::CpuInfo;
use crate::models::disk::DiskIoRate;
use crate::models::network::NetworkRate;
use crate::models::nvidia::GpuInfo;
use crate::models::MetricSnapshot;

/// Keeps the value, or turns the failure into an error record.
fn take<T>(
    errors: &mut Vec<ErrorRecord>,
    source: ErrorSource,
    reading: Result<T, ReadingError>,
) -> Option<T> {
    match reading {
        Ok(value) => Some(value),
        Err(e) => {
            errors.push(ErrorRecord::new(source, e.to_string()));
            None
        }
    }
}

fn take_rates(
    errors: &mut Vec<ErrorRecord>,
    source: ErrorSource,
    reading: Result<CounterDelta, ReadingError>,
) -> Option<(f64, f64)> {
    let delta = take(errors, source, reading)?;
    if delta.reset {
        errors.push(ErrorRecord::new(
            source,
            "counter went backwards, rate reported as 0",
        ));
    }
    Some(delta.rates)
}

/// Takes one snapshot per call. Owns the counter baselines, so only one task
/// may drive it.
pub struct MetricSampler<S> {
    source: S,
    tracker: CounterDeltaTracker,
    top_n: usize,
}

impl<S: TelemetrySource> MetricSampler<S> {
    pub fn new(source: S, top_n: usize) -> Self {
        Self {
            source,
            tracker: CounterDeltaTracker::new(),
            top_n,
        }
    }

    pub async fn sample(&mut self) -> (MetricSnapshot, Vec<ErrorRecord>) {
        let start = Instant::now();
        let mut errors = Vec::new();
        let mut snapshot = MetricSnapshot::default();

        snapshot.cpu = CpuInfo {
            per_core: take(&mut errors, ErrorSource::CpuUsage, self.source.cpu_usage())
                .unwrap_or_default(),
            frequency: take(&mut errors, ErrorSource::CpuFreq, self.source.cpu_frequency()),
            temperature: take(
                &mut errors,
                ErrorSource::CpuTemp,
                self.source.cpu_temperature(),
            ),
        };
        snapshot.temperatures = take(
            &mut errors,
            ErrorSource::Temperatures,
            self.source.temperatures(),
        )
        .unwrap_or_default();
        snapshot.fans = take(&mut errors, ErrorSource::Fans, self.source.fan_speeds())
            .unwrap_or_default();
        snapshot.ram = take(&mut errors, ErrorSource::Ram, self.source.memory());
        snapshot.disk_usage = take(
            &mut errors,
            ErrorSource::DiskUsage,
            self.source.disk_usage(),
        );

        let disk = self
            .tracker
            .observe(CounterFamily::Disk, self.source.disk_counters());
        snapshot.disk_io = take_rates(&mut errors, ErrorSource::DiskIo, disk)
            .map(|(read, write)| DiskIoRate { read, write });

        let network = self
            .tracker
            .observe(CounterFamily::Network, self.source.network_counters());
        snapshot.network = take_rates(&mut errors, ErrorSource::Network, network)
            .map(|(sent, received)| NetworkRate { sent, received });

        snapshot.power = take(&mut errors, ErrorSource::Power, self.source.power_draw());
        snapshot.top_processes = take(
            &mut errors,
            ErrorSource::TopProcesses,
            self.source.top_processes(self.top_n),
        )
        .unwrap_or_default();

        // Both shell out; neither should wait on the other.
        let (ram_frequency, gpu) =
            tokio::join!(self.source.memory_frequency(), self.source.gpu());
        snapshot.ram_frequency = take(&mut errors, ErrorSource::RamFreq, ram_frequency);
        snapshot.gpu =
            take(&mut errors, ErrorSource::Gpu, gpu).unwrap_or_else(GpuInfo::unavailable);

        debug!(
            "sample took: {} ms ({} errors)",
            start.elapsed().as_millis(),
            errors.len()
        );
        (snapshot, errors)
    }
}
