//! Command-line interface.

use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_FILE;
use crate::models::stress::WorkloadKind;
use crate::output::console::View;

#[derive(Parser, Debug)]
#[command(
    name = "stressmon",
    about = "Hardware telemetry monitor and stress tester",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (INI)
    #[arg(short = 'c', long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log at debug level regardless of the configuration
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sample telemetry until Ctrl-C
    Monitor {
        /// Sampling interval, overrides the configuration
        #[arg(long)]
        interval_ms: Option<u64>,

        #[arg(long, value_enum, default_value = "overview")]
        view: View,

        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,

        /// Append every tick to metrics.csv
        #[arg(long)]
        csv: bool,
    },

    /// Run synthetic load for a bounded time
    Stress {
        #[arg(long)]
        cpu: bool,

        #[arg(long)]
        ram: bool,

        #[arg(long)]
        disk: bool,

        #[arg(long)]
        gpu: bool,

        /// Every workload
        #[arg(long)]
        all: bool,

        /// Run time, overrides the configuration
        #[arg(short = 'd', long)]
        duration_secs: Option<u64>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Append results to stress_results.csv
        #[arg(long)]
        csv: bool,

        /// Print telemetry while the workloads run
        #[arg(long)]
        watch: bool,
    },

    /// Query S.M.A.R.T. health of every disk
    Smart {
        /// Append reports to smart_metrics.csv
        #[arg(long)]
        csv: bool,
    },

    /// Write the effective configuration to a file
    InitConfig {
        /// Defaults to the --config path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    #[command(hide = true)]
    CpuWorker {
        #[arg(long, default_value_t = 200)]
        matrix_size: usize,
    },
}

/// Workloads picked by the stress flags. `--all` or no flag at all selects
/// every workload.
pub fn selected_workloads(
    cpu: bool,
    ram: bool,
    disk: bool,
    gpu: bool,
    all: bool,
) -> BTreeSet<WorkloadKind> {
    let flags = [
        (WorkloadKind::Cpu, cpu),
        (WorkloadKind::Ram, ram),
        (WorkloadKind::Disk, disk),
        (WorkloadKind::Gpu, gpu),
    ];
    if all || flags.iter().all(|(_, on)| !on) {
        return WorkloadKind::ALL.into_iter().collect();
    }
    flags
        .into_iter()
        .filter(|(_, on)| *on)
        .map(|(kind, _)| kind)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_monitor() {
        let cli = Cli::parse_from(["stressmon", "monitor", "--view", "disk", "--ticks", "3"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        match cli.command {
            Commands::Monitor { view, ticks, csv, .. } => {
                assert_eq!(view, View::Disk);
                assert_eq!(ticks, Some(3));
                assert!(!csv);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_stress_with_global_flags() {
        let cli = Cli::parse_from([
            "stressmon", "stress", "--ram", "-d", "5", "--config", "x.ini", "-v",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("x.ini"));
        assert!(matches!(
            cli.command,
            Commands::Stress {
                ram: true,
                cpu: false,
                duration_secs: Some(5),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_cpu_worker() {
        let cli = Cli::parse_from(["stressmon", "cpu-worker", "--matrix-size", "64"]);
        assert!(matches!(cli.command, Commands::CpuWorker { matrix_size: 64 }));
    }

    #[test]
    fn test_selected_workloads() {
        let all: BTreeSet<_> = WorkloadKind::ALL.into_iter().collect();
        assert_eq!(selected_workloads(false, false, false, false, false), all);
        assert_eq!(selected_workloads(true, false, false, false, true), all);
        assert_eq!(
            selected_workloads(false, true, true, false, false),
            [WorkloadKind::Ram, WorkloadKind::Disk].into_iter().collect()
        );
    }
}
