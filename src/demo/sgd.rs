//! Asynchronous minibatch SGD for the least-squares demo
//!
//! Workers answer a query `x` with the minibatch gradient of
//! `½ (a · x - b)²` over their own rows. The coordinator applies each
//! gradient as it arrives, with step `step_size / (1 + decay * k)`, and
//! sends the updated `x` back to the worker that produced it. Gradients may
//! be stale by however many steps other workers completed meanwhile.

use super::least_squares::{dot, Shard};
use crate::algorithm::{Algorithm, WorkerId, WorkerView};
use crate::config::AlgorithmConfig;
use crate::stopping::{StopLimits, StoppingCriteria};
use anyhow::Result;
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// Worker answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gradient {
    pub values: Vec<f64>,
    /// Mean loss over the minibatch, at the query point
    pub loss: f64,
}

/// Coordinator state
#[derive(Debug, Clone)]
pub struct Sgd {
    x: Vec<f64>,
    step_size: f64,
    decay: f64,
    batch_size: usize,
    tolerance: Option<f64>,
    seed: u64,
    steps: u64,
    last_grad_norm: Option<f64>,
    last_loss: Option<f64>,
}

impl Sgd {
    pub fn new(step_size: f64, decay: f64, batch_size: usize, seed: u64) -> Self {
        Self {
            x: Vec::new(),
            step_size,
            decay,
            batch_size,
            tolerance: None,
            seed,
            steps: 0,
            last_grad_norm: None,
            last_loss: None,
        }
    }

    pub fn from_config(config: &AlgorithmConfig, seed: u64) -> Self {
        let mut sgd = Self::new(config.step_size, config.decay, config.batch_size, seed);
        sgd.tolerance = config.tolerance;
        sgd
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn solution(&self) -> &[f64] {
        &self.x
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn last_grad_norm(&self) -> Option<f64> {
        self.last_grad_norm
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.last_loss
    }

    /// Euclidean distance from the current iterate to `truth`
    pub fn distance_to(&self, truth: &[f64]) -> f64 {
        self.x
            .iter()
            .zip(truth)
            .map(|(x, t)| (x - t) * (x - t))
            .sum::<f64>()
            .sqrt()
    }

    /// True once the last gradient norm fell below the tolerance
    pub fn converged(&self) -> bool {
        match (self.tolerance, self.last_grad_norm) {
            (Some(tolerance), Some(norm)) => norm < tolerance,
            _ => false,
        }
    }

    /// Stopping criteria from `limits`, plus the tolerance test when one is set
    pub fn criteria(&self, limits: StopLimits) -> StoppingCriteria<Sgd> {
        let criteria = StoppingCriteria::from_limits(limits);
        if self.tolerance.is_some() {
            criteria.stop_if(|sgd: &Sgd, _iteration| sgd.converged())
        } else {
            criteria
        }
    }
}

/// What a worker needs to compute a minibatch gradient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgdView {
    pub batch_size: usize,
    pub seed: u64,
    /// Coordinator step count at dispatch time
    pub round: u64,
}

impl SgdView {
    fn rng(&self, shard: &Shard) -> Xoshiro256PlusPlus {
        let worker = shard.worker.map_or(0, |id| u64::from(id.0));
        Xoshiro256PlusPlus::seed_from_u64(self.seed ^ self.round.rotate_left(20) ^ worker.rotate_left(40))
    }
}

impl WorkerView<Shard> for SgdView {
    type Query = Vec<f64>;
    type Answer = Gradient;

    fn worker_step(&self, x: &Vec<f64>, shard: &Shard) -> Result<Gradient> {
        if shard.is_empty() {
            anyhow::bail!("Shard holds no rows");
        }
        if x.len() != shard.dimension {
            anyhow::bail!("Query has dimension {}, shard has {}", x.len(), shard.dimension);
        }
        if self.batch_size == 0 {
            anyhow::bail!("Batch size must be at least 1");
        }

        let mut rng = self.rng(shard);
        let mut values = vec![0.0; shard.dimension];
        let mut loss = 0.0;
        for _ in 0..self.batch_size {
            let i = rng.gen_range(0..shard.len());
            let residual = dot(&shard.rows[i], x) - shard.targets[i];
            loss += 0.5 * residual * residual;
            for (g, a) in values.iter_mut().zip(&shard.rows[i]) {
                *g += residual * a;
            }
        }

        let scale = 1.0 / self.batch_size as f64;
        values.iter_mut().for_each(|g| *g *= scale);
        Ok(Gradient {
            values,
            loss: loss * scale,
        })
    }
}

impl Algorithm<Shard> for Sgd {
    type Query = Vec<f64>;
    type Answer = Gradient;
    type View = SgdView;

    fn initialize(&mut self, shard: &Shard) -> Result<Vec<f64>> {
        self.x = vec![0.0; shard.dimension];
        self.steps = 0;
        Ok(self.x.clone())
    }

    fn view(&self) -> SgdView {
        SgdView {
            batch_size: self.batch_size,
            seed: self.seed,
            round: self.steps,
        }
    }

    fn coordinator_step(&mut self, answer: Gradient, _worker: WorkerId, _shard: &Shard) -> Result<Vec<f64>> {
        if answer.values.len() != self.x.len() {
            anyhow::bail!(
                "Gradient has dimension {}, iterate has {}",
                answer.values.len(),
                self.x.len()
            );
        }
        if answer.values.iter().any(|g| !g.is_finite()) {
            anyhow::bail!("Gradient is not finite at step {}", self.steps + 1);
        }

        self.steps += 1;
        let step = self.step_size / (1.0 + self.decay * self.steps as f64);
        for (x, g) in self.x.iter_mut().zip(&answer.values) {
            *x -= step * g;
        }
        self.last_grad_norm = Some(answer.values.iter().map(|g| g * g).sum::<f64>().sqrt());
        self.last_loss = Some(answer.loss);
        Ok(self.x.clone())
    }
}
