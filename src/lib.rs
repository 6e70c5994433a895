pub mod aggregator;
pub mod cli;
pub mod collectors;
pub mod config;
pub mod delta;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod output;
pub mod sampler;
pub mod sampling;
pub mod stress;
pub mod utils;

use anyhow::Context;
use chrono::Local;
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::aggregator::{ErrorAggregator, ErrorRecord, ErrorSource};
use crate::cli::{selected_workloads, Cli, Commands};
use crate::collectors::smart::SmartMonitor;
use crate::collectors::HostTelemetry;
use crate::config::AppConfig;
use crate::models::stress::WorkloadKind;
use crate::models::Tick;
use crate::output::console::{self, ConsoleReporter, View};
use crate::output::csv::{self as csv_out, CsvRecorder};
use crate::sampler::MetricSampler;
use crate::sampling::{MetricsConsumer, SamplingLoop};
use crate::stress::orchestrator::StressOrchestrator;

pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    info!("Starting stressmon");

    let result = match cli.command {
        Commands::Monitor {
            interval_ms,
            view,
            ticks,
            csv,
        } => monitor(&config, interval_ms, view, ticks, csv).await,
        Commands::Stress {
            cpu,
            ram,
            disk,
            gpu,
            all,
            duration_secs,
            json,
            csv,
            watch,
        } => {
            let kinds = selected_workloads(cpu, ram, disk, gpu, all);
            let duration = duration_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.stress.duration());
            stress(&config, kinds, duration, json, csv, watch).await
        }
        Commands::Smart { csv } => smart(&config, csv).await,
        Commands::InitConfig { output } => config.save(output.unwrap_or(cli.config)),
        Commands::CpuWorker { matrix_size } => {
            stress::cpu::run_cpu_worker(matrix_size);
        }
    };

    match result {
        Ok(_) => info!("Application completed successfully"),
        Err(e) => {
            error!("Application error: {e:#}");
            // Print chain of error causes
            let mut source = e.source();
            while let Some(e) = source {
                error!("Caused by: {e}");
                source = e.source();
            }
            return Err(e).context("Application failed to run");
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => debug!("Received SIGINT"),
        _ = terminate => debug!("Received SIGTERM"),
    }
}

fn csv_recorder(
    config: &AppConfig,
    requested: bool,
    name: &str,
    header: &[&str],
) -> anyhow::Result<Option<CsvRecorder>> {
    if !(requested || config.output.csv_enabled) {
        return Ok(None);
    }
    let dir = PathBuf::from(&config.output.csv_dir);
    let recorder = CsvRecorder::create(&dir, name, header)
        .with_context(|| format!("Failed to open {}", dir.join(name).display()))?;
    Ok(Some(recorder))
}

fn new_sampling_loop(
    config: &AppConfig,
    errors: ErrorAggregator,
) -> SamplingLoop<HostTelemetry> {
    let source = HostTelemetry::new(
        config.resources.clone(),
        config.sampling.command_timeout(),
    );
    let sampler = MetricSampler::new(source, config.sampling.top_processes);
    SamplingLoop::new(sampler, errors, config.diagnostics.clone())
}

async fn monitor(
    config: &AppConfig,
    interval_ms: Option<u64>,
    view: View,
    ticks: Option<u64>,
    csv: bool,
) -> anyhow::Result<()> {
    let interval = interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.sampling.interval());
    let errors = ErrorAggregator::new();
    let mut recorder = csv_recorder(
        config,
        csv,
        csv_out::METRICS_FILE,
        &csv_out::METRICS_HEADER,
    )?;
    let mut view_recorder = match csv_out::view_layout(view) {
        Some((name, header, row)) => {
            csv_recorder(config, csv, name, header)?.map(|r| r.with_tick_row(row))
        }
        None => None,
    };
    let mut reporter = ConsoleReporter::new(view);

    let mut sampling = new_sampling_loop(config, errors.clone());
    let (tx, mut rx) = mpsc::unbounded_channel::<Tick>();
    sampling.start(interval, tx)?;

    let mut delivered = 0u64;
    loop {
        tokio::select! {
            tick = rx.recv() => {
                let Some(tick) = tick else { break };
                reporter.on_tick(&tick);
                let recorders = [recorder.as_mut(), view_recorder.as_mut()];
                for recorder in recorders.into_iter().flatten() {
                    recorder.on_tick(&tick);
                }
                delivered += 1;
                if ticks.is_some_and(|n| delivered >= n) {
                    break;
                }
            }
            _ = shutdown_signal() => {
                info!("Interrupted, stopping the monitor");
                break;
            }
        }
    }

    sampling.stop();
    sampling.join().await;
    info!("{} ticks delivered, {} errors recorded", delivered, errors.len());
    Ok(())
}

/// Records raised by the workloads themselves, oldest first.
fn workload_errors(errors: &ErrorAggregator) -> Vec<ErrorRecord> {
    errors
        .snapshot()
        .into_iter()
        .filter(|record| matches!(record.source, ErrorSource::Stress(_)))
        .collect()
}

async fn stress(
    config: &AppConfig,
    kinds: BTreeSet<WorkloadKind>,
    duration: Duration,
    json: bool,
    csv: bool,
    watch: bool,
) -> anyhow::Result<()> {
    let errors = ErrorAggregator::new();
    let mut recorder = csv_recorder(
        config,
        csv,
        csv_out::STRESS_FILE,
        &csv_out::STRESS_HEADER,
    )?;
    let orchestrator = Arc::new(StressOrchestrator::from_config(
        &config.stress,
        errors.clone(),
    ));

    let names: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
    info!("Stress testing {} for {}s", names.join(", "), duration.as_secs());

    let mut watcher = if watch {
        let view = match (kinds.len(), kinds.first()) {
            (1, Some(&kind)) => View::from(kind),
            _ => View::Overview,
        };
        // Sampler failures are shown per tick and kept out of the report.
        let mut sampling = new_sampling_loop(config, ErrorAggregator::new());
        sampling.start(config.sampling.interval(), ConsoleReporter::new(view))?;
        Some(sampling)
    } else {
        None
    };

    let interrupt = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Interrupted, stopping workloads");
            orchestrator.stop();
        })
    };
    let results = orchestrator.run_selected(&kinds, duration).await;
    interrupt.abort();

    if let Some(sampling) = watcher.as_mut() {
        sampling.stop();
        sampling.join().await;
    }

    let reported = workload_errors(&errors);
    if json {
        let report = serde_json::json!({
            "results": results.values().collect::<Vec<_>>(),
            "errors": reported,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise results")?
        );
    } else {
        for line in console::format_stress_results(&results) {
            println!("{}", line);
        }
        for record in &reported {
            println!("ERROR {}", record);
        }
    }

    if let Some(recorder) = recorder.as_mut() {
        for result in results.values() {
            recorder
                .append(&csv_out::stress_row(result))
                .with_context(|| format!("Failed to write {}", recorder.path().display()))?;
        }
    }
    Ok(())
}

async fn smart(config: &AppConfig, csv: bool) -> anyhow::Result<()> {
    let monitor = SmartMonitor::new(config.sampling.command_timeout());
    let reports = monitor.scan().await.context("S.M.A.R.T. scan failed")?;
    debug!("{} S.M.A.R.T. reports", reports.len());

    for line in console::format_smart_reports(&reports) {
        println!("{}", line);
    }

    if let Some(mut recorder) =
        csv_recorder(config, csv, csv_out::SMART_FILE, &csv_out::SMART_HEADER)?
    {
        let now = Local::now();
        for report in &reports {
            recorder
                .append(&csv_out::smart_row(&now, report))
                .with_context(|| format!("Failed to write {}", recorder.path().display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stress_report_keeps_only_workload_errors() {
        let errors = ErrorAggregator::new();
        errors.record(ErrorSource::Gpu, "nvidia-smi not found");
        errors.record(ErrorSource::Stress(WorkloadKind::Disk), "seq_q1t1 failed");
        errors.record(ErrorSource::Power, "no battery");
        errors.record(
            ErrorSource::Stress(WorkloadKind::Cpu),
            "1 of 4 workers exited early",
        );

        let reported = workload_errors(&errors);

        let sources: Vec<_> = reported.iter().map(|r| r.source).collect();
        assert_eq!(
            sources,
            vec![
                ErrorSource::Stress(WorkloadKind::Disk),
                ErrorSource::Stress(WorkloadKind::Cpu),
            ]
        );
    }
}
