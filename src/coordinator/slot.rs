//! Per-worker bookkeeping

use crate::algorithm::WorkerId;
use crate::stats::histogram::LatencyHistogram;
use crate::stats::{WorkerStatus, WorkerSummary};
use anyhow::Result;
use std::collections::BTreeSet;
use std::time::Instant;

/// Coordinator-side state of one worker
///
/// Invariant: at most one outstanding query. `dispatch` refuses a second
/// query until `accept` consumed the answer to the first.
#[derive(Debug)]
pub struct WorkerSlot<Q> {
    id: WorkerId,
    status: WorkerStatus,
    outstanding: Option<Q>,
    dispatched_at: Option<Instant>,
    dispatched: u64,
    answers: u64,
    round_trip: LatencyHistogram,
    failure: Option<String>,
}

impl<Q> WorkerSlot<Q> {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            status: WorkerStatus::Starting,
            outstanding: None,
            dispatched_at: None,
            dispatched: 0,
            answers: 0,
            round_trip: LatencyHistogram::new(),
            failure: None,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    pub fn outstanding(&self) -> Option<&Q> {
        self.outstanding.as_ref()
    }

    pub fn is_starting(&self) -> bool {
        self.status == WorkerStatus::Starting
    }

    pub fn mark_ready(&mut self) {
        if self.status == WorkerStatus::Starting {
            self.status = WorkerStatus::Idle;
        }
    }

    /// Record a query as in flight
    pub fn dispatch(&mut self, query: Q) -> Result<()> {
        if self.outstanding.is_some() {
            anyhow::bail!("worker {} already has an outstanding query", self.id);
        }
        self.outstanding = Some(query);
        self.dispatched_at = Some(Instant::now());
        self.dispatched += 1;
        self.status = WorkerStatus::AwaitingAnswer;
        Ok(())
    }

    /// Consume the outstanding query on answer arrival
    pub fn accept(&mut self) -> Result<Q> {
        let query = self
            .outstanding
            .take()
            .ok_or_else(|| anyhow::anyhow!("unsolicited answer from worker {}", self.id))?;
        if let Some(sent) = self.dispatched_at.take() {
            self.round_trip.record(sent.elapsed());
        }
        self.answers += 1;
        self.status = WorkerStatus::Idle;
        Ok(query)
    }

    /// Attach a failure; the first one wins
    pub fn fail(&mut self, error: &anyhow::Error) {
        if self.failure.is_none() {
            self.failure = Some(format!("{:#}", error));
        }
    }

    pub fn begin_stop(&mut self, delivered: bool) {
        self.status = if delivered {
            WorkerStatus::Stopping
        } else {
            WorkerStatus::Exited
        };
    }

    pub fn is_stopping(&self) -> bool {
        self.status == WorkerStatus::Stopping
    }

    pub fn mark_stopped(&mut self) {
        self.outstanding = None;
        self.status = WorkerStatus::Stopped;
    }

    pub fn mark_exited(&mut self) {
        self.outstanding = None;
        self.status = WorkerStatus::Exited;
    }

    /// Drop a stale outstanding query whose answer arrived during shutdown
    pub fn discard_outstanding(&mut self) {
        self.outstanding = None;
        self.dispatched_at = None;
    }

    pub fn abandon(&mut self) {
        self.status = WorkerStatus::Abandoned;
    }

    pub fn summary(&self) -> WorkerSummary {
        let status = if self.failure.is_some() {
            WorkerStatus::Failed
        } else {
            self.status
        };
        WorkerSummary {
            worker: self.id,
            status,
            dispatched: self.dispatched,
            answers: self.answers,
            round_trip: self.round_trip.summary(),
            failure: self.failure.clone(),
        }
    }
}

/// Counts epochs: one completes when every worker has answered since the last
#[derive(Debug)]
pub struct EpochTracker {
    workers: Vec<WorkerId>,
    pending: BTreeSet<WorkerId>,
    completed: u64,
}

impl EpochTracker {
    pub fn new(workers: &[WorkerId]) -> Self {
        Self {
            workers: workers.to_vec(),
            pending: workers.iter().copied().collect(),
            completed: 0,
        }
    }

    /// Note an accepted answer; returns true if it closed an epoch
    pub fn record(&mut self, worker: WorkerId) -> bool {
        self.pending.remove(&worker);
        if self.pending.is_empty() && !self.workers.is_empty() {
            self.completed += 1;
            self.pending.extend(self.workers.iter().copied());
            return true;
        }
        false
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }
}
