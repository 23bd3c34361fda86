//! Engine error kinds
//!
//! A run fails with exactly one [`EngineError`], wrapped in a [`RunFailure`]
//! that also carries whatever history was accumulated before the failure.

use crate::algorithm::{Callback, WorkerId};
use crate::history::History;
use std::fmt;
use thiserror::Error;

fn describe(worker: &Option<WorkerId>) -> String {
    match worker {
        Some(id) => format!(" on worker {}", id),
        None => String::new(),
    }
}

/// Why a run was aborted
#[derive(Debug, Error)]
pub enum EngineError {
    /// `initialize`, `worker_step` or `coordinator_step` returned an error (or panicked)
    #[error("{callback} failed{}", describe(.worker))]
    Callback {
        callback: Callback,
        worker: Option<WorkerId>,
        #[source]
        source: anyhow::Error,
    },

    /// A message could not be delivered to or from a worker
    #[error("transport failure{}", describe(.worker))]
    Transport {
        worker: Option<WorkerId>,
        #[source]
        source: anyhow::Error,
    },

    /// The run could not be set up (shard factory, worker registration, connection)
    #[error("configuration error{}", describe(.worker))]
    Configuration {
        worker: Option<WorkerId>,
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    pub(crate) fn callback(callback: Callback, worker: Option<WorkerId>, source: anyhow::Error) -> Self {
        EngineError::Callback { callback, worker, source }
    }

    pub(crate) fn transport(worker: Option<WorkerId>, source: anyhow::Error) -> Self {
        EngineError::Transport { worker, source }
    }

    pub(crate) fn configuration(worker: Option<WorkerId>, source: anyhow::Error) -> Self {
        EngineError::Configuration { worker, source }
    }

    /// The worker the failure was recorded against, if any
    pub fn worker(&self) -> Option<WorkerId> {
        match self {
            EngineError::Callback { worker, .. }
            | EngineError::Transport { worker, .. }
            | EngineError::Configuration { worker, .. } => *worker,
        }
    }

    pub fn is_callback(&self) -> bool {
        matches!(self, EngineError::Callback { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, EngineError::Transport { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, EngineError::Configuration { .. })
    }
}

/// A failed run: the error plus the partial history
pub struct RunFailure<Q, A> {
    pub error: EngineError,
    pub history: History<Q, A>,
}

impl<Q, A> RunFailure<Q, A> {
    /// Drop the partial history, keeping only the error
    pub fn into_error(self) -> EngineError {
        self.error
    }
}

impl<Q, A> fmt::Debug for RunFailure<Q, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunFailure")
            .field("error", &self.error)
            .field("entries", &self.history.len())
            .finish()
    }
}

impl<Q, A> fmt::Display for RunFailure<Q, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {} iterations)", self.error, self.history.len())
    }
}

impl<Q, A> std::error::Error for RunFailure<Q, A> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
