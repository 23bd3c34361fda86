//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//! The library entry points only need [`RunOptions`] and a stopping
//! criterion; [`Config`] is the binary's view of a whole run, including the
//! parameters of the built-in demo problem.
//!
//! ```toml
//! [stopping]
//! iterations = 5000
//! time = "30s"
//!
//! [run]
//! workers = 4
//! grace_period = "2s"
//!
//! [problem]
//! dimension = 20
//! rows_per_worker = 2000
//!
//! [algorithm]
//! step_size = 0.05
//! tolerance = 1e-4
//!
//! [output]
//! json = "history.json"
//! ```

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use crate::coordinator::{RunOptions, DEFAULT_GRACE_PERIOD, DEFAULT_STARTUP_TIMEOUT};
use crate::stopping::{CancelToken, StopLimits};
use crate::algorithm::WorkerId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete run configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stopping: StopLimits,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub problem: ProblemConfig,
    #[serde(default)]
    pub algorithm: AlgorithmConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Worker count, defaulting to the number of CPUs
    pub fn worker_count(&self) -> usize {
        self.run.workers.unwrap_or_else(num_cpus::get)
    }

    /// Library run options for `count` workers numbered from 1
    pub fn run_options(&self, count: usize, cancel: Option<CancelToken>) -> RunOptions {
        RunOptions {
            workers: WorkerId::range(count),
            grace_period: self.run.grace_period,
            startup_timeout: self.run.startup_timeout,
            record_answers: self.run.record_answers,
            progress_every: self.run.progress_every,
            cancel,
        }
    }
}

/// Run section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of workers (standalone mode; default: CPU count)
    pub workers: Option<usize>,
    /// Time workers get to acknowledge Stop
    #[serde(default = "default_grace_period", with = "duration_format")]
    pub grace_period: Duration,
    /// Time workers get to build their shards
    #[serde(default = "default_startup_timeout", with = "duration_format")]
    pub startup_timeout: Duration,
    /// Keep every accepted answer in the history
    #[serde(default)]
    pub record_answers: bool,
    /// Log progress every N iterations
    pub progress_every: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            record_answers: false,
            progress_every: None,
        }
    }
}

fn default_grace_period() -> Duration {
    DEFAULT_GRACE_PERIOD
}

fn default_startup_timeout() -> Duration {
    DEFAULT_STARTUP_TIMEOUT
}

/// Synthetic least-squares problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemConfig {
    /// Number of unknowns
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Rows of the design matrix held by each worker
    #[serde(default = "default_rows_per_worker")]
    pub rows_per_worker: usize,
    /// Standard deviation of the observation noise
    #[serde(default = "default_noise")]
    pub noise: f64,
    /// Seed for the true solution and every worker's rows
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_dimension() -> usize {
    10
}

fn default_rows_per_worker() -> usize {
    1000
}

fn default_noise() -> f64 {
    0.1
}

fn default_seed() -> u64 {
    42
}

impl Default for ProblemConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            rows_per_worker: default_rows_per_worker(),
            noise: default_noise(),
            seed: default_seed(),
        }
    }
}

/// Asynchronous SGD parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    /// Initial step size
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    /// Step decay: `step = step_size / (1 + decay * k)`
    #[serde(default = "default_decay")]
    pub decay: f64,
    /// Rows sampled per gradient
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Stop once a gradient norm falls below this
    pub tolerance: Option<f64>,
}

fn default_step_size() -> f64 {
    0.05
}

fn default_decay() -> f64 {
    0.001
}

fn default_batch_size() -> usize {
    32
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            step_size: default_step_size(),
            decay: default_decay(),
            batch_size: default_batch_size(),
            tolerance: None,
        }
    }
}

/// Output section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Write the history as JSON
    pub json: Option<PathBuf>,
    /// Write one CSV row per history entry
    pub csv: Option<PathBuf>,
}

/// Serde adapter for human-readable durations (`"500ms"`, `"30s"`, `"5m"`)
pub mod duration_format {
    use super::cli_convert::{format_duration_str, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration_str(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_duration(&text).map_err(|e| serde::de::Error::custom(format!("{:#}", e)))
    }

    /// Same format, for optional fields
    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
            match duration {
                Some(duration) => serializer.serialize_some(&format_duration_str(*duration)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(text) => parse_duration(&text)
                    .map(Some)
                    .map_err(|e| serde::de::Error::custom(format!("{:#}", e))),
                None => Ok(None),
            }
        }
    }
}
