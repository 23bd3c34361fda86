use crate::algorithm::WorkerId;
use crate::stats::histogram::LatencySummary;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Registered, shard not built yet
    Starting,
    /// Ready, no outstanding query
    Idle,
    /// One query outstanding
    AwaitingAnswer,
    /// A callback or transport failure was recorded against this worker
    Failed,
    /// Stop was sent, acknowledgment pending
    Stopping,
    /// Stop acknowledged
    Stopped,
    /// Stop not acknowledged within the grace period
    Abandoned,
    /// The worker's execution context was already gone at shutdown
    Exited,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            WorkerStatus::Starting => "starting",
            WorkerStatus::Idle => "idle",
            WorkerStatus::AwaitingAnswer => "awaiting answer",
            WorkerStatus::Failed => "failed",
            WorkerStatus::Stopping => "stopping",
            WorkerStatus::Stopped => "stopped",
            WorkerStatus::Abandoned => "abandoned",
            WorkerStatus::Exited => "exited",
        };
        f.write_str(text)
    }
}

/// Per-worker statistics returned with the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker: WorkerId,
    pub status: WorkerStatus,
    /// Queries sent to this worker
    pub dispatched: u64,
    /// Answers accepted from this worker
    pub answers: u64,
    /// Dispatch-to-acceptance latency digest
    pub round_trip: Option<LatencySummary>,
    /// Failure recorded against this worker, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}
