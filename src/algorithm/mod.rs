//! Algorithm contract
//!
//! An iterative algorithm is described by three callbacks, split across two
//! types so that coordinator-only state can never leak to a worker:
//!
//! - [`Algorithm`]: the coordinator-owned, mutable algorithm state. It
//!   produces the first query (`initialize`), folds each answer into the
//!   state (`coordinator_step`) and hands out [`WorkerView`] snapshots.
//! - [`WorkerView`]: a read-only snapshot of the fields a worker needs
//!   (typically hyperparameters). It runs `worker_step` against the
//!   worker-local problem shard.
//!
//! The engine never looks inside queries, answers or shards.
//!
//! # Example
//!
//! ```
//! use asyncalgo::algorithm::{Algorithm, WorkerId, WorkerView};
//!
//! /// Subtracts every answer from a running total.
//! struct Accumulate {
//!     total: f64,
//! }
//!
//! #[derive(Clone)]
//! struct Echo;
//!
//! impl WorkerView<f64> for Echo {
//!     type Query = f64;
//!     type Answer = f64;
//!
//!     fn worker_step(&self, _query: &f64, shard: &f64) -> anyhow::Result<f64> {
//!         Ok(*shard)
//!     }
//! }
//!
//! impl Algorithm<f64> for Accumulate {
//!     type Query = f64;
//!     type Answer = f64;
//!     type View = Echo;
//!
//!     fn initialize(&mut self, _shard: &f64) -> anyhow::Result<f64> {
//!         Ok(self.total)
//!     }
//!
//!     fn view(&self) -> Echo {
//!         Echo
//!     }
//!
//!     fn coordinator_step(&mut self, answer: f64, _worker: WorkerId, _shard: &f64) -> anyhow::Result<f64> {
//!         self.total -= answer;
//!         Ok(self.total)
//!     }
//! }
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a worker execution unit
///
/// Identifiers are chosen by the caller (see [`crate::coordinator::RunOptions`])
/// and are unique within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl WorkerId {
    /// Consecutive identifiers `1..=count`
    pub fn range(count: usize) -> Vec<WorkerId> {
        (1..=count as u32).map(WorkerId).collect()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for WorkerId {
    fn from(id: u32) -> Self {
        WorkerId(id)
    }
}

/// Which execution context a problem shard is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The single coordinator holding the canonical algorithm state
    Coordinator,
    /// A worker execution unit
    Worker(WorkerId),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Coordinator => write!(f, "coordinator"),
            Role::Worker(id) => write!(f, "worker {}", id),
        }
    }
}

/// Coordinator side of an iterative algorithm
///
/// `P` is the problem shard type. The coordinator gets its own shard (built
/// with [`Role::Coordinator`]); workers' shards never reach the coordinator.
///
/// # Contract
///
/// - `initialize` is called exactly once, before any worker receives a
///   query. Its result is broadcast unchanged to every worker.
/// - `coordinator_step` is the only place the algorithm state changes. Calls
///   are strictly serialized. It always returns the next query for the worker
///   that produced `answer`; to idle workers, configure a stopping bound.
/// - `view` is called once per dispatched query and must not mutate state.
pub trait Algorithm<P>: Send {
    /// Coordinator → worker payload
    type Query: Clone + Send + 'static;
    /// Worker → coordinator payload
    type Answer: Clone + Send + 'static;
    /// Snapshot of the fields `worker_step` reads
    type View: WorkerView<P, Query = Self::Query, Answer = Self::Answer>;

    /// Produce the first query
    fn initialize(&mut self, shard: &P) -> Result<Self::Query>;

    /// Snapshot the worker-visible fields of the current state
    fn view(&self) -> Self::View;

    /// Fold one answer into the state and produce that worker's next query
    fn coordinator_step(
        &mut self,
        answer: Self::Answer,
        worker: WorkerId,
        shard: &P,
    ) -> Result<Self::Query>;
}

/// Worker side of an iterative algorithm
///
/// A view is cloned into every dispatch, so it should stay small. It may be
/// stochastic (e.g. sample a minibatch) but must report failures through the
/// returned `Result` instead of swallowing them.
pub trait WorkerView<P>: Clone + Send + 'static {
    type Query;
    type Answer;

    /// Compute the answer to `query` against the worker-local shard
    fn worker_step(&self, query: &Self::Query, shard: &P) -> Result<Self::Answer>;
}

/// The three callback names, used to label failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Callback {
    Initialize,
    WorkerStep,
    CoordinatorStep,
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Initialize => write!(f, "initialize"),
            Callback::WorkerStep => write!(f, "worker_step"),
            Callback::CoordinatorStep => write!(f, "coordinator_step"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_range() {
        let ids = WorkerId::range(3);
        assert_eq!(ids, vec![WorkerId(1), WorkerId(2), WorkerId(3)]);
        assert!(WorkerId::range(0).is_empty());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Coordinator.to_string(), "coordinator");
        assert_eq!(Role::Worker(WorkerId(7)).to_string(), "worker 7");
    }
}
