//! Execution history
//!
//! The coordinator appends exactly one [`HistoryEntry`] per accepted
//! `coordinator_step`. Because those calls are serialized, insertion order is
//! the global iteration order. Entries are never removed or reordered, and
//! the finished [`History`] is handed to the caller by value.

use crate::algorithm::WorkerId;
use crate::stats::{WorkerStatus, WorkerSummary};
use crate::stopping::StopReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One accepted coordinator step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry<Q> {
    /// Global iteration index, starting at 1
    pub iteration: u64,
    /// Worker whose answer was applied
    pub worker: WorkerId,
    /// Query produced by the step (sent back to `worker` unless the run stopped)
    pub query: Q,
    /// Wall-clock acceptance time
    pub timestamp: DateTime<Utc>,
    /// Time since initialization began
    pub elapsed: Duration,
}

/// Ordered record of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History<Q, A> {
    entries: Vec<HistoryEntry<Q>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    answers: Option<Vec<A>>,
    workers: Vec<WorkerSummary>,
    stop_reason: Option<StopReason>,
    epochs: u64,
    elapsed: Duration,
}

impl<Q, A> History<Q, A> {
    pub fn entries(&self) -> &[HistoryEntry<Q>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEntry<Q>> {
        self.entries.last()
    }

    /// Accepted answers in acceptance order, when answer retention was on
    ///
    /// `answers()[i]` is the answer that produced `entries()[i]`.
    pub fn answers(&self) -> Option<&[A]> {
        self.answers.as_deref()
    }

    pub fn workers(&self) -> &[WorkerSummary] {
        &self.workers
    }

    pub fn worker(&self, id: WorkerId) -> Option<&WorkerSummary> {
        self.workers.iter().find(|summary| summary.worker == id)
    }

    /// None only if the run never reached Running
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn epochs(&self) -> u64 {
        self.epochs
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Number of entries produced by each worker's answers
    pub fn count_for(&self, worker: WorkerId) -> usize {
        self.entries.iter().filter(|entry| entry.worker == worker).count()
    }
}

/// Append-only builder owned by the coordinator
#[derive(Debug)]
pub struct HistoryRecorder<Q, A> {
    entries: Vec<HistoryEntry<Q>>,
    answers: Option<Vec<A>>,
}

impl<Q, A> HistoryRecorder<Q, A> {
    pub fn new(record_answers: bool) -> Self {
        Self {
            entries: Vec::new(),
            answers: record_answers.then(Vec::new),
        }
    }

    /// True when the recorder keeps answers and wants a copy of each
    pub fn wants_answers(&self) -> bool {
        self.answers.is_some()
    }

    /// Append the entry for the next iteration
    ///
    /// The iteration index is assigned here, so indices are contiguous
    /// from 1 regardless of which worker answered.
    pub fn push(&mut self, worker: WorkerId, query: Q, answer: Option<A>, elapsed: Duration) -> u64 {
        let iteration = self.entries.len() as u64 + 1;
        self.entries.push(HistoryEntry {
            iteration,
            worker,
            query,
            timestamp: Utc::now(),
            elapsed,
        });
        if let (Some(answers), Some(answer)) = (self.answers.as_mut(), answer) {
            answers.push(answer);
        }
        iteration
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze into a [`History`]
    pub fn finish(
        self,
        workers: Vec<WorkerSummary>,
        stop_reason: Option<StopReason>,
        epochs: u64,
        elapsed: Duration,
    ) -> History<Q, A> {
        History {
            entries: self.entries,
            answers: self.answers,
            workers,
            stop_reason,
            epochs,
            elapsed,
        }
    }
}

/// Count of workers that ended in `status`
pub fn workers_with_status<Q, A>(history: &History<Q, A>, status: WorkerStatus) -> usize {
    history.workers.iter().filter(|summary| summary.status == status).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: u32, status: WorkerStatus) -> WorkerSummary {
        WorkerSummary {
            worker: WorkerId(id),
            status,
            dispatched: 0,
            answers: 0,
            round_trip: None,
            failure: None,
        }
    }

    #[test]
    fn test_iterations_are_contiguous() {
        let mut recorder: HistoryRecorder<i32, i32> = HistoryRecorder::new(false);
        assert_eq!(recorder.push(WorkerId(2), 10, None, Duration::ZERO), 1);
        assert_eq!(recorder.push(WorkerId(1), 20, None, Duration::ZERO), 2);
        assert_eq!(recorder.push(WorkerId(2), 30, None, Duration::ZERO), 3);

        let history = recorder.finish(vec![], Some(StopReason::IterationLimit), 1, Duration::ZERO);
        let indices: Vec<u64> = history.entries().iter().map(|e| e.iteration).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(history.count_for(WorkerId(2)), 2);
        assert_eq!(history.last().unwrap().query, 30);
        assert!(history.answers().is_none());
    }

    #[test]
    fn test_answers_retained_in_order() {
        let mut recorder: HistoryRecorder<i32, &str> = HistoryRecorder::new(true);
        assert!(recorder.wants_answers());
        recorder.push(WorkerId(1), 1, Some("a"), Duration::ZERO);
        recorder.push(WorkerId(2), 2, Some("b"), Duration::ZERO);

        let history = recorder.finish(vec![], None, 0, Duration::ZERO);
        assert_eq!(history.answers().unwrap(), &["a", "b"]);
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let mut recorder: HistoryRecorder<(), ()> = HistoryRecorder::new(false);
        for _ in 0..5 {
            recorder.push(WorkerId(1), (), None, Duration::ZERO);
        }
        let history = recorder.finish(vec![], None, 0, Duration::ZERO);
        for pair in history.entries().windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn test_worker_lookup() {
        let recorder: HistoryRecorder<(), ()> = HistoryRecorder::new(false);
        let history = recorder.finish(
            vec![summary(1, WorkerStatus::Stopped), summary(2, WorkerStatus::Abandoned)],
            Some(StopReason::TimeLimit),
            0,
            Duration::from_secs(1),
        );

        assert_eq!(history.worker(WorkerId(2)).unwrap().status, WorkerStatus::Abandoned);
        assert!(history.worker(WorkerId(3)).is_none());
        assert_eq!(workers_with_status(&history, WorkerStatus::Stopped), 1);
        assert!(history.is_empty());
    }
}
