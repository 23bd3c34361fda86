//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Standalone mode (default) - coordinator and local worker threads in one process
    Standalone,
    /// Coordinator mode - drive worker services on other hosts
    Coordinator,
    /// Service mode - host remote workers for a coordinator
    Service,
}

/// asyncalgo - asynchronous coordinator/worker solver (least-squares SGD demo)
#[derive(Parser, Debug)]
#[command(name = "asyncalgo")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: standalone, coordinator, or service
    #[arg(long, value_enum, default_value = "standalone")]
    pub mode: ExecutionMode,

    /// Port for service to listen on (service mode only)
    #[arg(long, default_value = "9999")]
    pub listen_port: u16,

    /// Comma-separated list of worker service addresses for coordinator mode
    /// (e.g., "10.0.1.10:9999,10.0.1.11"). Worker ids follow list order.
    #[arg(long)]
    pub host_list: Option<String>,

    /// Port to connect to on hosts listed without one (coordinator mode only)
    #[arg(long, default_value = "9999")]
    pub worker_port: u16,

    // === Run Options ===
    /// Number of local workers (standalone mode, default: CPU count)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Stop after this many accepted steps
    #[arg(short = 'n', long)]
    pub iterations: Option<u64>,

    /// Stop after this much wall time (e.g., "30s", "5m")
    #[arg(short = 't', long)]
    pub time: Option<String>,

    /// Stop after this many epochs (every worker answered once)
    #[arg(long)]
    pub epochs: Option<u64>,

    /// Time workers get to acknowledge Stop (e.g., "2s", "500ms")
    #[arg(long)]
    pub grace_period: Option<String>,

    /// Time workers get to build their shards
    #[arg(long)]
    pub startup_timeout: Option<String>,

    /// Keep every accepted answer in the history
    #[arg(long)]
    pub record_answers: bool,

    /// Log progress every N iterations
    #[arg(long)]
    pub progress_every: Option<u64>,

    // === Problem Options ===
    /// Number of unknowns
    #[arg(short = 'd', long)]
    pub dimension: Option<usize>,

    /// Rows held by each worker
    #[arg(long)]
    pub rows_per_worker: Option<usize>,

    /// Observation noise standard deviation
    #[arg(long)]
    pub noise: Option<f64>,

    /// Random seed for the synthetic problem
    #[arg(long)]
    pub seed: Option<u64>,

    // === Algorithm Options ===
    /// Initial SGD step size
    #[arg(long)]
    pub step_size: Option<f64>,

    /// Step size decay
    #[arg(long)]
    pub decay: Option<f64>,

    /// Rows sampled per gradient
    #[arg(short = 'b', long)]
    pub batch_size: Option<usize>,

    /// Stop once a gradient norm falls below this
    #[arg(long)]
    pub tolerance: Option<f64>,

    // === Output Options ===
    /// Write the history as JSON
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Write the history as CSV
    #[arg(long)]
    pub csv: Option<PathBuf>,

    // === Configuration File ===
    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Dry run - validate configuration without executing
    #[arg(long)]
    pub dry_run: bool,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["asyncalgo"]).unwrap();
        assert_eq!(cli.mode, ExecutionMode::Standalone);
        assert_eq!(cli.listen_port, 9999);
        assert!(cli.workers.is_none());
        assert!(!cli.record_answers);
    }

    #[test]
    fn test_coordinator_args() {
        let cli = Cli::try_parse_from([
            "asyncalgo",
            "--mode",
            "coordinator",
            "--host-list",
            "a:1,b:2",
            "-n",
            "100",
            "--time",
            "10s",
        ])
        .unwrap();
        assert_eq!(cli.mode, ExecutionMode::Coordinator);
        assert_eq!(cli.host_list.as_deref(), Some("a:1,b:2"));
        assert_eq!(cli.iterations, Some(100));
        assert_eq!(cli.time.as_deref(), Some("10s"));
    }

    #[test]
    fn test_invalid_mode() {
        assert!(Cli::try_parse_from(["asyncalgo", "--mode", "cluster"]).is_err());
    }
}
