//! Problem shard provider
//!
//! A [`ShardFactory`] builds the local problem data for one execution
//! context. It runs once per worker, on that worker's own thread (or in the
//! remote worker service), plus once for the coordinator. Shards are never
//! moved between contexts.
//!
//! Any `Fn(Role) -> anyhow::Result<P>` closure is a factory:
//!
//! ```
//! use asyncalgo::algorithm::Role;
//! use asyncalgo::problem::ShardFactory;
//!
//! let factory = |role: Role| -> anyhow::Result<Vec<f64>> {
//!     match role {
//!         Role::Coordinator => Ok(Vec::new()),
//!         Role::Worker(id) => Ok(vec![id.0 as f64; 4]),
//!     }
//! };
//!
//! let shard = factory.build(Role::Coordinator)?;
//! assert!(shard.is_empty());
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::algorithm::Role;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Builds a problem shard for a coordinator or worker
pub trait ShardFactory<P>: Send + Sync + 'static {
    /// Build the shard owned by `role`
    fn build(&self, role: Role) -> Result<P>;
}

impl<P, F> ShardFactory<P> for F
where
    F: Fn(Role) -> Result<P> + Send + Sync + 'static,
{
    fn build(&self, role: Role) -> Result<P> {
        self(role)
    }
}

/// Build a shard, labelling failures with the role they were built for
pub(crate) fn build_shard<P, F>(factory: &Arc<F>, role: Role) -> Result<P>
where
    F: ShardFactory<P> + ?Sized,
{
    factory
        .build(role)
        .with_context(|| format!("Failed to build problem shard for {}", role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::WorkerId;

    #[test]
    fn test_closure_factory() {
        let factory = Arc::new(|role: Role| -> Result<u32> {
            match role {
                Role::Coordinator => Ok(0),
                Role::Worker(id) => Ok(id.0 * 10),
            }
        });

        assert_eq!(build_shard(&factory, Role::Coordinator).unwrap(), 0);
        assert_eq!(build_shard(&factory, Role::Worker(WorkerId(3))).unwrap(), 30);
    }

    #[test]
    fn test_factory_error_names_role() {
        let factory = Arc::new(|role: Role| -> Result<u32> {
            match role {
                Role::Worker(WorkerId(2)) => anyhow::bail!("disk unavailable"),
                _ => Ok(1),
            }
        });

        let err = build_shard(&factory, Role::Worker(WorkerId(2))).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("worker 2"));
        assert!(message.contains("disk unavailable"));
    }
}
