//! Stopping criteria
//!
//! The evaluator is a pure decision over the run's [`Progress`] and the
//! current algorithm state. A run stops as soon as ANY configured bound is
//! reached:
//!
//! - `iterations`: accepted coordinator steps `>= max_iterations`
//! - `time`: wall time since initialization began `>= max_duration`
//! - `epochs`: completed epochs `>= max_epochs` (an epoch completes once
//!   every worker has had an answer accepted since the previous epoch)
//! - `stop_if`: the user predicate returns `true`
//!
//! # Unbounded runs
//!
//! Configuring no bound at all is legal. Such a run never stops by itself:
//! it ends only on a failure or when its [`CancelToken`] fires. Providing
//! one of the two is the caller's responsibility; the engine logs a warning
//! but does not invent a default.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;

/// Why a run left the Running phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    IterationLimit,
    TimeLimit,
    EpochLimit,
    Predicate,
    Cancelled,
    Failed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::IterationLimit => "iteration limit reached",
            StopReason::TimeLimit => "time limit reached",
            StopReason::EpochLimit => "epoch limit reached",
            StopReason::Predicate => "stop predicate satisfied",
            StopReason::Cancelled => "cancelled",
            StopReason::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Snapshot of run progress handed to the evaluator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Accepted coordinator steps so far (global across workers)
    pub iteration: u64,
    /// Wall time since initialization began
    pub elapsed: Duration,
    /// Completed epochs
    pub epochs: u64,
}

/// Numeric bounds, without a predicate
///
/// This is the serializable part of [`StoppingCriteria`], used by the
/// configuration layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopLimits {
    pub iterations: Option<u64>,
    #[serde(default, with = "crate::config::duration_format::option")]
    pub time: Option<Duration>,
    pub epochs: Option<u64>,
}

type Predicate<S> = Box<dyn Fn(&S, u64) -> bool + Send + Sync>;

/// Stopping criteria over algorithm state `S`
///
/// ```
/// use asyncalgo::stopping::{Progress, StopReason, StoppingCriteria};
/// use std::time::Duration;
///
/// let criteria = StoppingCriteria::<f64>::new()
///     .iterations(100)
///     .time(Duration::from_secs(60))
///     .stop_if(|state, _iteration| *state < 1e-6);
///
/// let progress = Progress { iteration: 100, ..Default::default() };
/// assert_eq!(criteria.evaluate(&1.0, &progress), Some(StopReason::IterationLimit));
/// ```
pub struct StoppingCriteria<S> {
    limits: StopLimits,
    stop_if: Option<Predicate<S>>,
}

impl<S> Default for StoppingCriteria<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> StoppingCriteria<S> {
    /// No bounds (an unbounded run, see module docs)
    pub fn new() -> Self {
        Self {
            limits: StopLimits::default(),
            stop_if: None,
        }
    }

    /// Start from numeric limits loaded from configuration
    pub fn from_limits(limits: StopLimits) -> Self {
        Self {
            limits,
            stop_if: None,
        }
    }

    /// Stop once `max` coordinator steps have been accepted
    pub fn iterations(mut self, max: u64) -> Self {
        self.limits.iterations = Some(max);
        self
    }

    /// Stop once `max` wall time has elapsed since initialization began
    pub fn time(mut self, max: Duration) -> Self {
        self.limits.time = Some(max);
        self
    }

    /// Stop once `max` epochs have completed
    pub fn epochs(mut self, max: u64) -> Self {
        self.limits.epochs = Some(max);
        self
    }

    /// Stop when `predicate(state, iteration)` returns true
    pub fn stop_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&S, u64) -> bool + Send + Sync + 'static,
    {
        self.stop_if = Some(Box::new(predicate));
        self
    }

    pub fn limits(&self) -> &StopLimits {
        &self.limits
    }

    /// The wall-time bound, if any
    pub fn max_duration(&self) -> Option<Duration> {
        self.limits.time
    }

    /// True when nothing can stop the run except failure or cancellation
    pub fn is_unbounded(&self) -> bool {
        self.limits.iterations.is_none()
            && self.limits.time.is_none()
            && self.limits.epochs.is_none()
            && self.stop_if.is_none()
    }

    /// Decide whether to stop
    ///
    /// Numeric bounds are checked before the predicate so the predicate is
    /// not called once a cheaper bound already fired.
    pub fn evaluate(&self, state: &S, progress: &Progress) -> Option<StopReason> {
        if let Some(max) = self.limits.iterations {
            if progress.iteration >= max {
                return Some(StopReason::IterationLimit);
            }
        }
        if let Some(max) = self.limits.time {
            if progress.elapsed >= max {
                return Some(StopReason::TimeLimit);
            }
        }
        if let Some(max) = self.limits.epochs {
            if progress.epochs >= max {
                return Some(StopReason::EpochLimit);
            }
        }
        match &self.stop_if {
            Some(predicate) if predicate(state, progress.iteration) => Some(StopReason::Predicate),
            _ => None,
        }
    }
}

impl<S> fmt::Debug for StoppingCriteria<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoppingCriteria")
            .field("limits", &self.limits)
            .field("stop_if", &self.stop_if.is_some())
            .finish()
    }
}

/// External abort signal, observed at the coordinator's wait step
///
/// Clones share the same signal. Cancelling is idempotent.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: std::sync::Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: std::sync::Arc::new(sender),
        }
    }

    /// Request the run to stop
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once the token has been cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(iteration: u64, elapsed_ms: u64, epochs: u64) -> Progress {
        Progress {
            iteration,
            elapsed: Duration::from_millis(elapsed_ms),
            epochs,
        }
    }

    #[test]
    fn test_unbounded_never_stops() {
        let criteria = StoppingCriteria::<()>::new();
        assert!(criteria.is_unbounded());
        assert_eq!(criteria.evaluate(&(), &progress(u64::MAX, u64::MAX, u64::MAX)), None);
    }

    #[test]
    fn test_iteration_bound_is_inclusive() {
        let criteria = StoppingCriteria::<()>::new().iterations(5);
        assert_eq!(criteria.evaluate(&(), &progress(4, 0, 0)), None);
        assert_eq!(criteria.evaluate(&(), &progress(5, 0, 0)), Some(StopReason::IterationLimit));
    }

    #[test]
    fn test_time_bound() {
        let criteria = StoppingCriteria::<()>::new().time(Duration::from_millis(100));
        assert_eq!(criteria.evaluate(&(), &progress(1, 99, 0)), None);
        assert_eq!(criteria.evaluate(&(), &progress(1, 100, 0)), Some(StopReason::TimeLimit));
    }

    #[test]
    fn test_epoch_bound() {
        let criteria = StoppingCriteria::<()>::new().epochs(2);
        assert_eq!(criteria.evaluate(&(), &progress(10, 0, 1)), None);
        assert_eq!(criteria.evaluate(&(), &progress(10, 0, 2)), Some(StopReason::EpochLimit));
    }

    #[test]
    fn test_predicate_sees_state_and_iteration() {
        let criteria = StoppingCriteria::<i64>::new().stop_if(|state, iteration| *state < 0 && iteration > 2);
        assert_eq!(criteria.evaluate(&-1, &progress(2, 0, 0)), None);
        assert_eq!(criteria.evaluate(&1, &progress(3, 0, 0)), None);
        assert_eq!(criteria.evaluate(&-1, &progress(3, 0, 0)), Some(StopReason::Predicate));
        assert!(!criteria.is_unbounded());
    }

    #[test]
    fn test_any_bound_stops() {
        let criteria = StoppingCriteria::<()>::new()
            .iterations(1000)
            .time(Duration::from_secs(1));
        assert_eq!(criteria.evaluate(&(), &progress(3, 1500, 0)), Some(StopReason::TimeLimit));
        assert_eq!(criteria.evaluate(&(), &progress(1000, 10, 0)), Some(StopReason::IterationLimit));
    }

    #[test]
    fn test_from_limits() {
        let limits = StopLimits {
            iterations: Some(3),
            time: None,
            epochs: None,
        };
        let criteria = StoppingCriteria::<()>::from_limits(limits);
        assert_eq!(criteria.limits().iterations, Some(3));
        assert_eq!(criteria.evaluate(&(), &progress(3, 0, 0)), Some(StopReason::IterationLimit));
    }

    #[tokio::test]
    async fn test_cancel_token() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());

        let waiter = tokio::spawn(async move { observer.cancelled().await });
        token.cancel();
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancellation not observed")
            .unwrap();
        assert!(token.is_cancelled());
    }
}
