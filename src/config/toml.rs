//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use crate::config::cli_convert::parse_duration;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents).context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Load the config file named on the command line (or defaults) and apply CLI overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    merge_cli_with_config(cli, config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Stopping bounds
    if let Some(iterations) = cli.iterations {
        config.stopping.iterations = Some(iterations);
    }
    if let Some(time) = &cli.time {
        config.stopping.time = Some(parse_duration(time)?);
    }
    if let Some(epochs) = cli.epochs {
        config.stopping.epochs = Some(epochs);
    }

    // Run settings
    if let Some(workers) = cli.workers {
        config.run.workers = Some(workers);
    }
    if let Some(grace) = &cli.grace_period {
        config.run.grace_period = parse_duration(grace)?;
    }
    if let Some(startup) = &cli.startup_timeout {
        config.run.startup_timeout = parse_duration(startup)?;
    }
    // Flag can only turn retention on
    if cli.record_answers {
        config.run.record_answers = true;
    }
    if let Some(every) = cli.progress_every {
        config.run.progress_every = Some(every);
    }

    // Problem
    if let Some(dimension) = cli.dimension {
        config.problem.dimension = dimension;
    }
    if let Some(rows) = cli.rows_per_worker {
        config.problem.rows_per_worker = rows;
    }
    if let Some(noise) = cli.noise {
        config.problem.noise = noise;
    }
    if let Some(seed) = cli.seed {
        config.problem.seed = seed;
    }

    // Algorithm
    if let Some(step_size) = cli.step_size {
        config.algorithm.step_size = step_size;
    }
    if let Some(decay) = cli.decay {
        config.algorithm.decay = decay;
    }
    if let Some(batch_size) = cli.batch_size {
        config.algorithm.batch_size = batch_size;
    }
    if let Some(tolerance) = cli.tolerance {
        config.algorithm.tolerance = Some(tolerance);
    }

    // Output
    if let Some(json) = &cli.json {
        config.output.json = Some(json.clone());
    }
    if let Some(csv) = &cli.csv {
        config.output.csv = Some(csv.clone());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_parse_toml_basic() {
        let toml = r#"
            [stopping]
            iterations = 500
            time = "90s"

            [run]
            workers = 3
            grace_period = "750ms"
            record_answers = true

            [problem]
            dimension = 4
            seed = 7

            [algorithm]
            step_size = 0.1
            tolerance = 0.001

            [output]
            json = "out.json"
        "#;

        let config = parse_toml_string(toml).unwrap();
        assert_eq!(config.stopping.iterations, Some(500));
        assert_eq!(config.stopping.time, Some(Duration::from_secs(90)));
        assert_eq!(config.stopping.epochs, None);
        assert_eq!(config.run.workers, Some(3));
        assert_eq!(config.run.grace_period, Duration::from_millis(750));
        assert_eq!(config.run.startup_timeout, Duration::from_secs(30));
        assert!(config.run.record_answers);
        assert_eq!(config.problem.dimension, 4);
        assert_eq!(config.problem.rows_per_worker, 1000);
        assert_eq!(config.problem.seed, 7);
        assert_eq!(config.algorithm.step_size, 0.1);
        assert_eq!(config.algorithm.tolerance, Some(0.001));
        assert_eq!(config.output.json, Some(PathBuf::from("out.json")));
        assert!(config.output.csv.is_none());
    }

    #[test]
    fn test_parse_toml_empty() {
        let config = parse_toml_string("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_toml_bad_duration() {
        let err = parse_toml_string("[stopping]\ntime = \"soon\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid duration format"));
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut config = Config::default();
        config.stopping.time = Some(Duration::from_millis(1500));
        config.run.workers = Some(2);
        let text = ::toml::to_string(&config).unwrap();
        assert_eq!(parse_toml_string(&text).unwrap(), config);
    }

    #[test]
    fn test_parse_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[stopping]\nepochs = 12").unwrap();
        let config = parse_toml_file(file.path()).unwrap();
        assert_eq!(config.stopping.epochs, Some(12));

        assert!(parse_toml_file(Path::new("/nonexistent/asyncalgo.toml")).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let config = parse_toml_string("[stopping]\niterations = 10\n[run]\nworkers = 8\n").unwrap();
        let cli = Cli::try_parse_from(["asyncalgo", "-n", "20", "--time", "5m", "--seed", "3"]).unwrap();

        let merged = merge_cli_with_config(&cli, config).unwrap();
        assert_eq!(merged.stopping.iterations, Some(20));
        assert_eq!(merged.stopping.time, Some(Duration::from_secs(300)));
        assert_eq!(merged.run.workers, Some(8));
        assert_eq!(merged.problem.seed, 3);
    }

    #[test]
    fn test_cli_invalid_duration() {
        let cli = Cli::try_parse_from(["asyncalgo", "--grace-period", "later"]).unwrap();
        assert!(merge_cli_with_config(&cli, Config::default()).is_err());
    }
}
