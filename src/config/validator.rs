//! Configuration validation

use super::*;
use anyhow::Result;
use tracing::warn;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_stopping(&config.stopping)?;
    validate_run(&config.run)?;
    validate_problem(&config.problem)?;
    validate_algorithm(&config.algorithm)?;
    validate_output(&config.output)?;

    Ok(())
}

/// Validate stopping bounds
///
/// Zero bounds are rejected. Having no bound at all is allowed: the run then
/// ends only on Ctrl-C or a tolerance stop.
pub fn validate_stopping(stopping: &StopLimits) -> Result<()> {
    if stopping.iterations == Some(0) {
        anyhow::bail!("stopping.iterations must be greater than 0 if specified");
    }
    if stopping.epochs == Some(0) {
        anyhow::bail!("stopping.epochs must be greater than 0 if specified");
    }
    if stopping.time == Some(Duration::ZERO) {
        anyhow::bail!("stopping.time must be greater than 0 if specified");
    }

    if stopping.iterations.is_none() && stopping.time.is_none() && stopping.epochs.is_none() {
        warn!("No stopping bound configured, the run ends only on cancellation or convergence");
    }

    Ok(())
}

/// Validate run settings
pub fn validate_run(run: &RunConfig) -> Result<()> {
    if run.workers == Some(0) {
        anyhow::bail!("run.workers must be at least 1");
    }

    if let Some(workers) = run.workers {
        if workers > 1024 {
            warn!("Very high worker count ({}), each local worker is a thread", workers);
        }
    }

    if run.grace_period.is_zero() {
        anyhow::bail!("run.grace_period must be greater than 0");
    }
    if run.startup_timeout.is_zero() {
        anyhow::bail!("run.startup_timeout must be greater than 0");
    }
    if run.progress_every == Some(0) {
        anyhow::bail!("run.progress_every must be greater than 0 if specified");
    }

    Ok(())
}

/// Validate the synthetic problem
pub fn validate_problem(problem: &ProblemConfig) -> Result<()> {
    if problem.dimension == 0 {
        anyhow::bail!("problem.dimension must be at least 1");
    }
    if problem.rows_per_worker == 0 {
        anyhow::bail!("problem.rows_per_worker must be at least 1");
    }
    if !problem.noise.is_finite() || problem.noise < 0.0 {
        anyhow::bail!("problem.noise must be a finite, non-negative number (got {})", problem.noise);
    }

    Ok(())
}

/// Validate SGD parameters
pub fn validate_algorithm(algorithm: &AlgorithmConfig) -> Result<()> {
    if !algorithm.step_size.is_finite() || algorithm.step_size <= 0.0 {
        anyhow::bail!("algorithm.step_size must be positive (got {})", algorithm.step_size);
    }
    if !algorithm.decay.is_finite() || algorithm.decay < 0.0 {
        anyhow::bail!("algorithm.decay must be non-negative (got {})", algorithm.decay);
    }
    if algorithm.batch_size == 0 {
        anyhow::bail!("algorithm.batch_size must be at least 1");
    }
    if let Some(tolerance) = algorithm.tolerance {
        if !tolerance.is_finite() || tolerance <= 0.0 {
            anyhow::bail!("algorithm.tolerance must be positive if specified (got {})", tolerance);
        }
    }

    Ok(())
}

/// Validate output paths
pub fn validate_output(output: &OutputConfig) -> Result<()> {
    if let (Some(json), Some(csv)) = (&output.json, &output.csv) {
        if json == csv {
            anyhow::bail!("output.json and output.csv point to the same file: {}", json.display());
        }
    }

    Ok(())
}
