//! Synthetic least-squares problem
//!
//! Every worker holds `rows_per_worker` rows `(a, b)` with `a ~ N(0, I)` and
//! `b = a · x* + ε`, `ε ~ N(0, noise²)`. The true solution `x*` is drawn from
//! the seed alone, and each worker's rows from `seed + worker id`, so any
//! process can rebuild any worker's shard without moving data.

use crate::algorithm::{Role, WorkerId};
use crate::config::ProblemConfig;
use crate::problem::ShardFactory;
use anyhow::Result;
use rand::Rng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, StandardNormal};
use rand_xoshiro::Xoshiro256PlusPlus;

/// Problem data held by one execution context
#[derive(Debug, Clone, PartialEq)]
pub struct Shard {
    /// Owner, or None for the coordinator
    pub worker: Option<WorkerId>,
    pub dimension: usize,
    /// Design matrix rows (empty on the coordinator)
    pub rows: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    /// True solution, for reporting
    pub truth: Vec<f64>,
}

impl Shard {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Shard factory for the synthetic problem
#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquares {
    pub dimension: usize,
    pub rows_per_worker: usize,
    pub noise: f64,
    pub seed: u64,
}

impl LeastSquares {
    pub fn from_config(config: &ProblemConfig) -> Self {
        Self {
            dimension: config.dimension,
            rows_per_worker: config.rows_per_worker,
            noise: config.noise,
            seed: config.seed,
        }
    }

    /// The true solution `x*`, uniform in [-1, 1)
    pub fn truth(&self) -> Vec<f64> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        (0..self.dimension).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    fn worker_rows(&self, worker: WorkerId, truth: &[f64]) -> Result<(Vec<Vec<f64>>, Vec<f64>)> {
        if !self.noise.is_finite() || self.noise < 0.0 {
            anyhow::bail!("Noise level must be finite and non-negative, got {}", self.noise);
        }
        let noise = Normal::new(0.0, self.noise)
            .map_err(|e| anyhow::anyhow!("Invalid noise level {}: {}", self.noise, e))?;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed.wrapping_add(u64::from(worker.0)));

        let mut rows = Vec::with_capacity(self.rows_per_worker);
        let mut targets = Vec::with_capacity(self.rows_per_worker);
        for _ in 0..self.rows_per_worker {
            let row: Vec<f64> = (0..self.dimension).map(|_| StandardNormal.sample(&mut rng)).collect();
            let target = dot(&row, truth) + noise.sample(&mut rng);
            rows.push(row);
            targets.push(target);
        }
        Ok((rows, targets))
    }
}

impl ShardFactory<Shard> for LeastSquares {
    fn build(&self, role: Role) -> Result<Shard> {
        if self.dimension == 0 {
            anyhow::bail!("Problem dimension must be at least 1");
        }
        let truth = self.truth();
        let (worker, rows, targets) = match role {
            Role::Coordinator => (None, Vec::new(), Vec::new()),
            Role::Worker(id) => {
                let (rows, targets) = self.worker_rows(id, &truth)?;
                (Some(id), rows, targets)
            }
        };
        Ok(Shard {
            worker,
            dimension: self.dimension,
            rows,
            targets,
            truth,
        })
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem() -> LeastSquares {
        LeastSquares {
            dimension: 4,
            rows_per_worker: 50,
            noise: 0.0,
            seed: 9,
        }
    }

    #[test]
    fn test_coordinator_shard_has_no_rows() {
        let shard = problem().build(Role::Coordinator).unwrap();
        assert!(shard.is_empty());
        assert_eq!(shard.worker, None);
        assert_eq!(shard.truth.len(), 4);
    }

    #[test]
    fn test_worker_shards_are_reproducible() {
        let a = problem().build(Role::Worker(WorkerId(2))).unwrap();
        let b = problem().build(Role::Worker(WorkerId(2))).unwrap();
        let c = problem().build(Role::Worker(WorkerId(3))).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.rows, c.rows);
        assert_eq!(a.truth, c.truth);
        assert_eq!(a.len(), 50);
    }

    #[test]
    fn test_noiseless_targets_match_truth() {
        let shard = problem().build(Role::Worker(WorkerId(1))).unwrap();
        for (row, target) in shard.rows.iter().zip(&shard.targets) {
            assert!((dot(row, &shard.truth) - target).abs() < 1e-12);
        }
    }

    #[test]
    fn test_invalid_parameters() {
        let mut bad = problem();
        bad.noise = -1.0;
        assert!(bad.build(Role::Worker(WorkerId(1))).is_err());

        let mut bad = problem();
        bad.dimension = 0;
        assert!(bad.build(Role::Coordinator).is_err());
    }
}
