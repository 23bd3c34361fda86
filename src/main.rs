//! asyncalgo CLI entry point

use anyhow::{Context, Result};
use asyncalgo::config::cli::{Cli, ExecutionMode};
use asyncalgo::config::{cli_convert, toml, validator, Config};
use asyncalgo::coordinator::{run, run_remote, RunResult};
use asyncalgo::demo::{Gradient, LeastSquares, Sgd, SgdView, Shard};
use asyncalgo::distributed::WorkerService;
use asyncalgo::output::{print_results, write_csv_output, write_json_output};
use asyncalgo::stopping::CancelToken;
use asyncalgo::util::time::format_duration;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("asyncalgo v{}", env!("CARGO_PKG_VERSION"));
    println!("Asynchronous coordinator/worker solver");
    println!();

    match cli.mode {
        ExecutionMode::Standalone => run_standalone(cli),
        ExecutionMode::Service => run_service(cli),
        ExecutionMode::Coordinator => run_coordinator(cli),
    }
}

/// Load, merge and validate the configuration
fn load_validated(cli: &Cli) -> Result<Config> {
    let config = toml::load_config(cli)?;
    validator::validate_config(&config).context("Configuration validation failed")?;
    Ok(config)
}

/// Run in standalone mode (local worker threads)
fn run_standalone(cli: Cli) -> Result<()> {
    let config = load_validated(&cli)?;
    let workers = config.worker_count();
    print_configuration(&config, &format!("standalone, {} local workers", workers));

    if cli.dry_run {
        println!();
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(async {
        let cancel = cancel_on_interrupt();
        let problem = LeastSquares::from_config(&config.problem);
        let truth = problem.truth();
        let mut sgd = Sgd::from_config(&config.algorithm, config.problem.seed);
        let criteria = sgd.criteria(config.stopping);
        let options = config.run_options(workers, Some(cancel));

        let outcome = run(&mut sgd, problem, criteria, options).await;
        report(outcome, &config, &sgd, &truth)
    })
}

/// Run in service mode (host remote workers)
fn run_service(cli: Cli) -> Result<()> {
    let config = load_validated(&cli)?;
    let problem = LeastSquares::from_config(&config.problem);

    if cli.dry_run {
        print_configuration(&config, &format!("service on port {}", cli.listen_port));
        println!();
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(async {
        let service = WorkerService::<Shard, SgdView, _>::new(problem);
        info!(node = %service.node_id(), port = cli.listen_port, "starting worker service");
        service.run(cli.listen_port).await
    })
}

/// Run in coordinator mode (drive remote worker services)
fn run_coordinator(cli: Cli) -> Result<()> {
    let host_list = cli
        .host_list
        .as_deref()
        .context("Coordinator mode requires --host-list")?;
    let hosts = cli_convert::parse_host_list(host_list, cli.worker_port)?;

    let config = load_validated(&cli)?;
    if let Some(workers) = config.run.workers {
        if workers != hosts.len() {
            warn!(
                configured = workers,
                hosts = hosts.len(),
                "worker count follows the host list in coordinator mode"
            );
        }
    }
    print_configuration(&config, &format!("coordinator, {} remote workers", hosts.len()));
    for (id, host) in hosts.iter().enumerate() {
        println!("  Worker {}: {}", id + 1, host);
    }

    if cli.dry_run {
        println!();
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(async {
        let cancel = cancel_on_interrupt();
        let problem = LeastSquares::from_config(&config.problem);
        let truth = problem.truth();
        let mut sgd = Sgd::from_config(&config.algorithm, config.problem.seed);
        let criteria = sgd.criteria(config.stopping);
        let options = config.run_options(hosts.len(), Some(cancel));

        let outcome = run_remote(&mut sgd, problem, criteria, options, &hosts).await;
        report(outcome, &config, &sgd, &truth)
    })
}

/// Cancel the run on Ctrl-C; workers still get the grace period
fn cancel_on_interrupt() -> CancelToken {
    let token = CancelToken::new();
    let signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping run");
            signal.cancel();
        }
    });
    token
}

/// Print results and write output files, for successful and failed runs alike
fn report(outcome: RunResult<Vec<f64>, Gradient>, config: &Config, sgd: &Sgd, truth: &[f64]) -> Result<()> {
    let (history, error) = match outcome {
        Ok(history) => (history, None),
        Err(failure) => (failure.history, Some(failure.error)),
    };

    println!();
    print_results(&history);
    if sgd.steps() > 0 {
        println!("Solution:");
        println!("  Steps:          {}", sgd.steps());
        if let Some(loss) = sgd.last_loss() {
            println!("  Last loss:      {:.6e}", loss);
        }
        if let Some(norm) = sgd.last_grad_norm() {
            println!("  Gradient norm:  {:.6e}", norm);
        }
        println!("  Distance to x*: {:.6e}", sgd.distance_to(truth));
    }

    if let Some(path) = &config.output.json {
        write_json_output(path, &history, true)?;
        info!(path = %path.display(), "wrote JSON history");
    }
    if let Some(path) = &config.output.csv {
        write_csv_output(path, &history)?;
        info!(path = %path.display(), "wrote CSV history");
    }

    match error {
        Some(error) => Err(anyhow::Error::new(error).context("Run failed")),
        None => Ok(()),
    }
}

fn print_configuration(config: &Config, mode: &str) {
    println!("Configuration:");
    println!("  Mode:        {}", mode);
    let stopping = &config.stopping;
    let mut bounds = Vec::new();
    if let Some(iterations) = stopping.iterations {
        bounds.push(format!("{} iterations", iterations));
    }
    if let Some(time) = stopping.time {
        bounds.push(format_duration(time));
    }
    if let Some(epochs) = stopping.epochs {
        bounds.push(format!("{} epochs", epochs));
    }
    if let Some(tolerance) = config.algorithm.tolerance {
        bounds.push(format!("gradient norm < {}", tolerance));
    }
    if bounds.is_empty() {
        bounds.push("none (Ctrl-C to stop)".to_string());
    }
    println!("  Stop after:  {}", bounds.join(" or "));
    println!("  Grace:       {}", format_duration(config.run.grace_period));
    println!(
        "  Problem:     dimension {}, {} rows/worker, noise {}, seed {}",
        config.problem.dimension, config.problem.rows_per_worker, config.problem.noise, config.problem.seed
    );
    println!(
        "  SGD:         step {}, decay {}, batch {}",
        config.algorithm.step_size, config.algorithm.decay, config.algorithm.batch_size
    );
}
