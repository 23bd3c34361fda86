//! Remote workers over TCP
//!
//! # Architecture
//!
//! - **Worker Service** (`service`): runs on worker hosts, hosts one worker
//!   execution unit per coordinator connection
//! - **Remote Link** (`remote`): coordinator side of one connection; bridges
//!   the socket to the same command/event channels local workers use
//! - **Protocol** (`protocol`): frame definitions and length-prefixed
//!   MessagePack framing
//!
//! Worker identifiers are assigned by the coordinator in endpoint order, so a
//! service process needs no configuration beyond its shard factory.

pub mod protocol;
pub mod remote;
pub mod service;

pub use protocol::{
    AssignMessage, ErrorMessage, ReadyMessage, Reply, Request, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use remote::connect_worker;
pub use service::WorkerService;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{Algorithm, Callback, Role, WorkerId, WorkerView};
    use crate::coordinator::{run_remote, RunOptions};
    use crate::stats::WorkerStatus;
    use crate::stopping::{StopReason, StoppingCriteria};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Answers `shard * factor`; fails once `factor` reaches `fail_at`
    #[derive(Clone, Serialize, Deserialize)]
    struct Scale {
        factor: i64,
        fail_at: Option<i64>,
    }

    impl WorkerView<i64> for Scale {
        type Query = i64;
        type Answer = i64;

        fn worker_step(&self, _query: &i64, shard: &i64) -> anyhow::Result<i64> {
            if matches!(self.fail_at, Some(limit) if self.factor >= limit) {
                anyhow::bail!("factor {} too large", self.factor);
            }
            Ok(shard * self.factor)
        }
    }

    /// Sums answers and bumps the factor after every step
    struct Sum {
        total: i64,
        factor: i64,
        fail_at: Option<i64>,
    }

    impl Sum {
        fn new(fail_at: Option<i64>) -> Self {
            Self {
                total: 0,
                factor: 1,
                fail_at,
            }
        }
    }

    impl Algorithm<i64> for Sum {
        type Query = i64;
        type Answer = i64;
        type View = Scale;

        fn initialize(&mut self, _shard: &i64) -> anyhow::Result<i64> {
            Ok(self.total)
        }

        fn view(&self) -> Scale {
            Scale {
                factor: self.factor,
                fail_at: self.fail_at,
            }
        }

        fn coordinator_step(&mut self, answer: i64, _worker: WorkerId, _shard: &i64) -> anyhow::Result<i64> {
            self.total += answer;
            self.factor += 1;
            Ok(self.total)
        }
    }

    fn coordinator_shard(_role: Role) -> anyhow::Result<i64> {
        Ok(0)
    }

    /// Start a service on an ephemeral loopback port; worker 13 cannot build its shard
    async fn start_service() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let service = WorkerService::<i64, Scale, _>::new(|role: Role| -> anyhow::Result<i64> {
            match role {
                Role::Worker(WorkerId(13)) => anyhow::bail!("no data for worker 13"),
                _ => Ok(1),
            }
        });
        tokio::spawn(service.serve(listener));
        address
    }

    #[tokio::test]
    async fn test_remote_run_over_loopback() {
        let address = start_service().await;
        let mut algorithm = Sum::new(None);

        let history = run_remote(
            &mut algorithm,
            coordinator_shard,
            StoppingCriteria::new().iterations(6),
            RunOptions::with_workers(2).record_answers(true),
            &[address.clone(), address],
        )
        .await
        .unwrap();

        assert_eq!(history.len(), 6);
        assert_eq!(history.stop_reason(), Some(StopReason::IterationLimit));
        assert_eq!(algorithm.total, history.answers().unwrap().iter().sum::<i64>());

        // The first answers come from the broadcast view, later ones see updated factors.
        let answers = history.answers().unwrap();
        assert_eq!(answers[0], 1);
        assert!(answers.iter().any(|a| *a > 1));

        for id in WorkerId::range(2) {
            assert_eq!(history.worker(id).unwrap().status, WorkerStatus::Stopped);
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_configuration_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut algorithm = Sum::new(None);
        let failure = run_remote(
            &mut algorithm,
            coordinator_shard,
            StoppingCriteria::new().iterations(3),
            RunOptions::with_workers(1).startup_timeout(Duration::from_secs(2)),
            &[address],
        )
        .await
        .unwrap_err();

        assert!(failure.error.is_configuration());
        assert_eq!(failure.error.worker(), Some(WorkerId(1)));
        assert!(failure.history.is_empty());
        assert_eq!(algorithm.total, 0);
    }

    #[tokio::test]
    async fn test_remote_setup_failure() {
        let address = start_service().await;
        let mut algorithm = Sum::new(None);

        let failure = run_remote(
            &mut algorithm,
            coordinator_shard,
            StoppingCriteria::new().iterations(3),
            RunOptions::new(vec![WorkerId(1), WorkerId(13)]),
            &[address.clone(), address],
        )
        .await
        .unwrap_err();

        assert!(failure.error.is_configuration());
        assert_eq!(failure.error.worker(), Some(WorkerId(13)));
        let chain = format!("{:#}", anyhow::Error::new(failure.error));
        assert!(chain.contains("no data for worker 13"));
        assert!(failure.history.is_empty());
    }

    #[tokio::test]
    async fn test_remote_step_failure() {
        let address = start_service().await;
        let mut algorithm = Sum::new(Some(4));

        let failure = run_remote(
            &mut algorithm,
            coordinator_shard,
            StoppingCriteria::new().iterations(100),
            RunOptions::with_workers(2),
            &[address.clone(), address],
        )
        .await
        .unwrap_err();

        match &failure.error {
            crate::EngineError::Callback { callback, worker, .. } => {
                assert_eq!(*callback, Callback::WorkerStep);
                assert!(worker.is_some());
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(failure.history.len() >= 3);
        assert!(failure.history.len() <= 4);
    }

    #[tokio::test]
    async fn test_endpoint_count_must_match() {
        let mut algorithm = Sum::new(None);
        let failure = run_remote(
            &mut algorithm,
            coordinator_shard,
            StoppingCriteria::new().iterations(1),
            RunOptions::with_workers(2),
            &["127.0.0.1:1".to_string()],
        )
        .await
        .unwrap_err();
        assert!(failure.error.is_configuration());
        assert_eq!(failure.error.worker(), None);
    }
}
