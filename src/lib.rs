//! asyncalgo - asynchronous coordinator/worker execution engine
//!
//! Runs distributed iterative algorithms in which a single coordinator owns
//! the algorithm state and a pool of workers, each holding a private shard of
//! the problem, answer queries against it. Workers never synchronize with one
//! another: whichever answer arrives first is folded into the state and that
//! worker immediately receives its next query.
//!
//! # Architecture
//!
//! - **Algorithm contract** (`algorithm`): `initialize`, `worker_step`,
//!   `coordinator_step`
//! - **Coordinator** (`coordinator`): startup, dispatch loop, stopping and
//!   bounded shutdown
//! - **Workers** (`worker`): local worker threads; remote workers over TCP in
//!   `distributed`
//! - **Stopping criteria** (`stopping`): iteration, time, epoch and predicate
//!   bounds plus external cancellation
//! - **History** (`history`): one entry per accepted step, in global order
//! - **Demo** (`demo`): asynchronous SGD on a synthetic least-squares problem

pub mod algorithm;
pub mod config;
pub mod coordinator;
pub mod demo;
pub mod distributed;
pub mod error;
pub mod history;
pub mod output;
pub mod problem;
pub mod stats;
pub mod stopping;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use algorithm::{Algorithm, Role, WorkerId, WorkerView};
pub use config::Config;
pub use coordinator::{run, run_blocking, run_remote, RunOptions, RunResult};
pub use error::{EngineError, RunFailure};
pub use history::{History, HistoryEntry};
pub use problem::ShardFactory;
pub use stopping::{CancelToken, StopReason, StoppingCriteria};

/// Result type used throughout asyncalgo
pub type Result<T> = anyhow::Result<T>;
