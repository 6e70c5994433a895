use anyhow::Context;
use clap::Parser;
use env_logger::{Builder, WriteStyle};
use log::{error, LevelFilter};
use stressmon::cli::{Cli, Commands};
use stressmon::config::AppConfig;
use stressmon::stress::cpu::run_cpu_worker;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Worker processes skip configuration, logging and the runtime.
    if let Commands::CpuWorker { matrix_size } = cli.command {
        run_cpu_worker(matrix_size);
    }

    // Load configuration first (without logging)
    let config = AppConfig::load_or_default(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {:#}", e);
        // Fall back to default configuration
        AppConfig::default()
    });

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        config.get_log_level()
    };
    Builder::new()
        .filter_level(level)
        .write_style(WriteStyle::Always)
        .format_timestamp_secs()
        .init();

    let runtime =
        tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    if let Err(e) = runtime.block_on(stressmon::run(cli, config)) {
        error!("Application error: {}", e);
        return Err(e);
    }
    Ok(())
}
