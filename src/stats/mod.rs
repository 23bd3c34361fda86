//! Statistics collection
//!
//! Per-worker bookkeeping returned with every [`crate::history::History`]:
//!
//! - **Round-trip histograms**: HdrHistogram digest of dispatch-to-acceptance
//!   latency per worker
//! - **Worker summaries**: final lifecycle status, query/answer counts and the
//!   failure recorded against the worker, if any

pub mod histogram;
mod summary;

pub use histogram::{LatencyHistogram, LatencySummary};
pub use summary::{WorkerStatus, WorkerSummary};
