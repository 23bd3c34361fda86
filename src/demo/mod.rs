//! Built-in demo: asynchronous SGD on a synthetic least-squares problem
//!
//! The binary runs this pair in every mode; library users plug in their own
//! [`crate::algorithm::Algorithm`] and [`crate::problem::ShardFactory`].
//!
//! ```no_run
//! use asyncalgo::coordinator::{run, RunOptions};
//! use asyncalgo::demo::{LeastSquares, Sgd};
//! use asyncalgo::stopping::StopLimits;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let problem = LeastSquares { dimension: 5, rows_per_worker: 500, noise: 0.01, seed: 1 };
//! let truth = problem.truth();
//! let mut sgd = Sgd::new(0.05, 0.001, 16, 1);
//! let limits = StopLimits { iterations: Some(2_000), ..Default::default() };
//! let criteria = sgd.criteria(limits);
//!
//! let history = run(&mut sgd, problem, criteria, RunOptions::with_workers(4))
//!     .await
//!     .map_err(|failure| failure.into_error())?;
//! println!("{} steps, error {:.4}", history.len(), sgd.distance_to(&truth));
//! # Ok(())
//! # }
//! ```

pub mod least_squares;
pub mod sgd;

pub use least_squares::{LeastSquares, Shard};
pub use sgd::{Gradient, Sgd, SgdView};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{run, RunOptions};
    use crate::stats::WorkerStatus;
    use crate::stopping::{StopLimits, StopReason};

    fn problem() -> LeastSquares {
        LeastSquares {
            dimension: 3,
            rows_per_worker: 200,
            noise: 0.0,
            seed: 11,
        }
    }

    #[tokio::test]
    async fn test_async_sgd_converges() {
        let problem = problem();
        let truth = problem.truth();
        let mut sgd = Sgd::new(0.05, 0.001, 16, 3);
        let limits = StopLimits {
            iterations: Some(2_000),
            ..Default::default()
        };
        let criteria = sgd.criteria(limits);

        let history = run(&mut sgd, problem, criteria, RunOptions::with_workers(2))
            .await
            .unwrap();

        assert_eq!(history.len(), 2_000);
        assert_eq!(history.stop_reason(), Some(StopReason::IterationLimit));
        assert_eq!(sgd.steps(), 2_000);
        assert!(sgd.distance_to(&truth) < 1e-3, "distance {}", sgd.distance_to(&truth));
        assert_eq!(history.last().unwrap().query, sgd.solution());
        for summary in history.workers() {
            assert_eq!(summary.status, WorkerStatus::Stopped);
            assert!(summary.answers > 0);
        }
    }

    #[tokio::test]
    async fn test_tolerance_stops_run() {
        let problem = problem();
        let mut sgd = Sgd::new(0.05, 0.0, 16, 3).with_tolerance(1e-6);
        let limits = StopLimits {
            iterations: Some(50_000),
            ..Default::default()
        };
        let criteria = sgd.criteria(limits);

        let history = run(&mut sgd, problem, criteria, RunOptions::with_workers(2))
            .await
            .unwrap();

        assert_eq!(history.stop_reason(), Some(StopReason::Predicate));
        assert!(sgd.converged());
        assert!(history.len() < 50_000);
    }
}
