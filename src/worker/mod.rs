//! Worker execution unit
//!
//! A worker owns one problem shard and loops over its command channel:
//!
//! 1. **Setup**: build the shard for `Role::Worker(id)`, report
//!    [`Event::Ready`] (or [`Event::Failed`] with [`Stage::Setup`]).
//! 2. **Serve**: for each [`Command::Query`], run `worker_step` with the view
//!    that travelled with the query and send back an [`Event::Answer`]
//!    tagged with this worker's id.
//! 3. **Stop**: on [`Command::Stop`], acknowledge with [`Event::Stopped`] and exit.
//!
//! The worker takes no lock to enforce "one query at a time": the
//! coordinator only dispatches after it consumed the previous answer.
//!
//! A failed `worker_step` is reported and the worker keeps waiting, so the
//! coordinator's Stop is still acknowledged. If the execution context
//! vanishes without acknowledging Stop, [`Event::Disconnected`] is emitted.

use crate::algorithm::{Role, WorkerId, WorkerView};
use crate::problem::{build_shard, ShardFactory};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Coordinator → worker message
#[derive(Debug, Clone)]
pub enum Command<V, Q> {
    /// Compute an answer; `view` is the algorithm snapshot taken at dispatch
    Query { view: V, query: Q },
    /// Acknowledge and exit
    Stop,
}

/// Where on the worker a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Building the shard or connecting, before any query
    Setup,
    /// Inside `worker_step`
    Step,
}

/// Worker → coordinator message
#[derive(Debug)]
pub enum Event<A> {
    Ready { worker: WorkerId },
    Answer { worker: WorkerId, answer: A },
    Failed { worker: WorkerId, stage: Stage, error: anyhow::Error },
    Stopped { worker: WorkerId },
    Disconnected { worker: WorkerId, reason: String },
}

impl<A> Event<A> {
    pub fn worker(&self) -> WorkerId {
        match self {
            Event::Ready { worker }
            | Event::Answer { worker, .. }
            | Event::Failed { worker, .. }
            | Event::Stopped { worker }
            | Event::Disconnected { worker, .. } => *worker,
        }
    }
}

/// Coordinator-side handle to one worker's command channel
///
/// This is the single producer of that worker's commands.
pub struct WorkerLink<V, Q> {
    id: WorkerId,
    commands: mpsc::UnboundedSender<Command<V, Q>>,
    thread: Option<JoinHandle<()>>,
}

impl<V, Q> WorkerLink<V, Q> {
    pub(crate) fn new(id: WorkerId, commands: mpsc::UnboundedSender<Command<V, Q>>) -> Self {
        Self {
            id,
            commands,
            thread: None,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Send a query; fails only if the worker is gone
    pub fn send_query(&self, view: V, query: Q) -> Result<()> {
        self.commands
            .send(Command::Query { view, query })
            .map_err(|_| anyhow::anyhow!("worker {} command channel is closed", self.id))
    }

    /// Ask the worker to stop
    ///
    /// Returns false if the worker had already exited. Stopping a stopped
    /// worker is a no-op, never an error.
    pub fn stop(&self) -> bool {
        self.commands.send(Command::Stop).is_ok()
    }

    /// True if the worker's command receiver is gone
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Detach from the worker thread, joining it only if it already finished
    pub(crate) fn release(mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.is_finished() && handle.join().is_err() {
                warn!(worker = %self.id, "worker thread panicked during shutdown");
            }
        }
    }
}

/// Emits `Disconnected` if the loop exits without a clean goodbye
struct ExitGuard<A> {
    worker: WorkerId,
    events: mpsc::UnboundedSender<Event<A>>,
    clean: bool,
}

impl<A> Drop for ExitGuard<A> {
    fn drop(&mut self) {
        if !self.clean {
            let _ = self.events.send(Event::Disconnected {
                worker: self.worker,
                reason: "worker exited without acknowledging stop".to_string(),
            });
        }
    }
}

/// Run `worker_step`, turning a panic into an error
pub(crate) fn guarded_step<P, V>(view: &V, query: &V::Query, shard: &P) -> Result<V::Answer>
where
    V: WorkerView<P>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| view.worker_step(query, shard))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(anyhow::anyhow!("worker_step panicked: {}", message))
        }
    }
}

/// Worker loop body, run on the worker's own thread
fn serve<P, V, F>(
    id: WorkerId,
    factory: Arc<F>,
    mut commands: mpsc::UnboundedReceiver<Command<V, V::Query>>,
    events: mpsc::UnboundedSender<Event<V::Answer>>,
) where
    V: WorkerView<P>,
    F: ShardFactory<P> + ?Sized,
{
    let mut guard = ExitGuard {
        worker: id,
        events: events.clone(),
        clean: false,
    };

    let shard = match build_shard(&factory, Role::Worker(id)) {
        Ok(shard) => shard,
        Err(error) => {
            guard.clean = true;
            let _ = events.send(Event::Failed { worker: id, stage: Stage::Setup, error });
            return;
        }
    };

    if events.send(Event::Ready { worker: id }).is_err() {
        guard.clean = true;
        return;
    }
    debug!(worker = %id, "worker ready");

    // `None` means the coordinator dropped its link (abandoned us); just exit.
    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::Query { view, query } => {
                let event = match guarded_step(&view, &query, &shard) {
                    Ok(answer) => Event::Answer { worker: id, answer },
                    Err(error) => Event::Failed { worker: id, stage: Stage::Step, error },
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            Command::Stop => {
                debug!(worker = %id, "worker stopping");
                let _ = events.send(Event::Stopped { worker: id });
                break;
            }
        }
    }
    guard.clean = true;
}

/// Spawn a worker execution unit on a dedicated OS thread
///
/// The shard is built on the new thread, so it never crosses a thread
/// boundary.
pub fn spawn_local<P, V, F>(
    id: WorkerId,
    factory: Arc<F>,
    events: mpsc::UnboundedSender<Event<V::Answer>>,
) -> Result<WorkerLink<V, V::Query>>
where
    P: 'static,
    V: WorkerView<P>,
    V::Query: Send + 'static,
    V::Answer: Send + 'static,
    F: ShardFactory<P> + ?Sized,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let handle = std::thread::Builder::new()
        .name(format!("asyncalgo-worker-{}", id))
        .spawn(move || serve::<P, V, F>(id, factory, command_rx, events))
        .with_context(|| format!("Failed to spawn thread for worker {}", id))?;

    let mut link = WorkerLink::new(id, command_tx);
    link.thread = Some(handle);
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Clone)]
    struct Doubler;

    impl WorkerView<i64> for Doubler {
        type Query = i64;
        type Answer = i64;

        fn worker_step(&self, query: &i64, shard: &i64) -> Result<i64> {
            if *query < 0 {
                anyhow::bail!("negative query {}", query);
            }
            if *query == 99 {
                panic!("boom");
            }
            Ok(query * 2 + shard)
        }
    }

    fn factory() -> Arc<impl ShardFactory<i64>> {
        Arc::new(|role: Role| -> Result<i64> {
            match role {
                Role::Worker(WorkerId(13)) => anyhow::bail!("unlucky shard"),
                Role::Worker(id) => Ok(id.0 as i64 * 100),
                Role::Coordinator => Ok(0),
            }
        })
    }

    async fn next<A>(events: &mut mpsc::UnboundedReceiver<Event<A>>) -> Event<A> {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for worker event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_query_answer_stop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = spawn_local::<i64, Doubler, _>(WorkerId(1), factory(), tx).unwrap();

        assert!(matches!(next(&mut rx).await, Event::Ready { worker: WorkerId(1) }));

        link.send_query(Doubler, 5).unwrap();
        match next(&mut rx).await {
            Event::Answer { worker, answer } => {
                assert_eq!(worker, WorkerId(1));
                assert_eq!(answer, 110);
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert!(link.stop());
        assert!(matches!(next(&mut rx).await, Event::Stopped { worker: WorkerId(1) }));
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = spawn_local::<i64, Doubler, _>(WorkerId(2), factory(), tx).unwrap();
        assert!(matches!(next(&mut rx).await, Event::Ready { .. }));

        link.stop();
        assert!(matches!(next(&mut rx).await, Event::Stopped { .. }));

        // The thread is gone; a second stop must not panic or error.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!link.stop());
        assert!(link.is_closed());
        link.release();
    }

    #[tokio::test]
    async fn test_step_failure_is_reported_and_worker_survives() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = spawn_local::<i64, Doubler, _>(WorkerId(3), factory(), tx).unwrap();
        assert!(matches!(next(&mut rx).await, Event::Ready { .. }));

        link.send_query(Doubler, -1).unwrap();
        match next(&mut rx).await {
            Event::Failed { worker, stage, error } => {
                assert_eq!(worker, WorkerId(3));
                assert_eq!(stage, Stage::Step);
                assert!(error.to_string().contains("negative query"));
            }
            other => panic!("unexpected event {:?}", other),
        }

        link.stop();
        assert!(matches!(next(&mut rx).await, Event::Stopped { .. }));
    }

    #[tokio::test]
    async fn test_panic_in_step_becomes_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = spawn_local::<i64, Doubler, _>(WorkerId(4), factory(), tx).unwrap();
        assert!(matches!(next(&mut rx).await, Event::Ready { .. }));

        link.send_query(Doubler, 99).unwrap();
        match next(&mut rx).await {
            Event::Failed { error, .. } => assert!(error.to_string().contains("boom")),
            other => panic!("unexpected event {:?}", other),
        }
        link.stop();
    }

    #[tokio::test]
    async fn test_setup_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _link = spawn_local::<i64, Doubler, _>(WorkerId(13), factory(), tx).unwrap();

        match next(&mut rx).await {
            Event::Failed { worker, stage, error } => {
                assert_eq!(worker, WorkerId(13));
                assert_eq!(stage, Stage::Setup);
                assert!(format!("{:#}", error).contains("unlucky shard"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_link_lets_worker_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = spawn_local::<i64, Doubler, _>(WorkerId(5), factory(), tx).unwrap();
        assert!(matches!(next(&mut rx).await, Event::Ready { .. }));

        drop(link);
        // No Stop was sent, and the worker exits quietly once its channel closes.
        assert!(tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().is_none());
    }
}
