//! Coordinator loop
//!
//! The coordinator owns the canonical algorithm state and drives every worker
//! through four phases:
//!
//! 1. **Initializing**: build the coordinator shard, wait until every worker
//!    reported Ready (its shard is built), call `initialize` once and send the
//!    resulting query to every worker.
//! 2. **Running**: wait on the shared event channel, the deadline timer and the
//!    cancel token at once. Each answer is folded in with `coordinator_step`,
//!    recorded, checked against the stopping criteria and, unless the run
//!    stops, answered with a fresh query for the same worker only.
//! 3. **Draining**: send Stop to every worker and collect acknowledgments for
//!    at most the grace period. Workers that do not answer are abandoned.
//! 4. **Terminated**: hand the history back.
//!
//! # Architecture
//!
//! Workers never share memory with the coordinator. Each one gets its own
//! command channel, and all of them feed a single fan-in event channel, so
//! the coordinator has exactly one place to wait and applies answers one at
//! a time in arrival order.

mod slot;

pub use slot::{EpochTracker, WorkerSlot};

use crate::algorithm::{Algorithm, Callback, Role, WorkerId};
use crate::distributed;
use crate::error::{EngineError, RunFailure};
use crate::history::{History, HistoryRecorder};
use crate::problem::{build_shard, ShardFactory};
use crate::stats::WorkerStatus;
use crate::stopping::{CancelToken, Progress, StopReason, StoppingCriteria};
use crate::util::time::format_duration;
use crate::worker::{self, Event, Stage, WorkerLink};
use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{self as tokio_time, Instant as Deadline};
use tracing::{debug, info, warn};

/// Default time workers get to acknowledge Stop
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Default time workers get to build their shards (or connect)
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a run: the full history, or the error plus the partial history
pub type RunResult<Q, A> = std::result::Result<History<Q, A>, RunFailure<Q, A>>;

/// Run-level options that are not stopping bounds
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker identifiers, unique; one execution unit per entry
    pub workers: Vec<WorkerId>,
    /// How long Draining waits for Stop acknowledgments
    pub grace_period: Duration,
    /// How long Initializing waits for every worker to report Ready
    pub startup_timeout: Duration,
    /// Keep every accepted answer in the history
    pub record_answers: bool,
    /// Log progress at `info` every this many iterations
    pub progress_every: Option<u64>,
    /// External abort signal
    pub cancel: Option<CancelToken>,
}

impl RunOptions {
    pub fn new(workers: Vec<WorkerId>) -> Self {
        Self {
            workers,
            grace_period: DEFAULT_GRACE_PERIOD,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            record_answers: false,
            progress_every: None,
            cancel: None,
        }
    }

    /// Workers `1..=count`
    pub fn with_workers(count: usize) -> Self {
        Self::new(WorkerId::range(count))
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn startup_timeout(mut self, startup_timeout: Duration) -> Self {
        self.startup_timeout = startup_timeout;
        self
    }

    pub fn record_answers(mut self, record_answers: bool) -> Self {
        self.record_answers = record_answers;
        self
    }

    pub fn progress_every(mut self, every: u64) -> Self {
        self.progress_every = Some(every);
        self
    }

    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Run `algorithm` on local worker threads
///
/// One OS thread per entry of `options.workers`; each builds its shard with
/// `shards` for `Role::Worker(id)`. The coordinator shard is built for
/// `Role::Coordinator` on the calling task.
pub async fn run<P, A, F>(
    algorithm: &mut A,
    shards: F,
    stopping: StoppingCriteria<A>,
    options: RunOptions,
) -> RunResult<A::Query, A::Answer>
where
    P: 'static,
    A: Algorithm<P>,
    F: ShardFactory<P>,
{
    let started = Instant::now();
    if let Err(error) = check_workers(&options.workers) {
        return Err(rejected(EngineError::configuration(None, error), started));
    }

    let factory = Arc::new(shards);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let mut links = Vec::with_capacity(options.workers.len());
    let mut spawn_error = None;
    for &id in &options.workers {
        match worker::spawn_local::<P, A::View, F>(id, Arc::clone(&factory), event_tx.clone()) {
            Ok(link) => links.push(link),
            Err(error) => {
                spawn_error = Some(EngineError::configuration(Some(id), error));
                break;
            }
        }
    }
    drop(event_tx);

    let session = Session::new(algorithm, stopping, options, links, event_rx, started);
    if let Some(error) = spawn_error {
        return session.shutdown(Err(error)).await;
    }
    let shard = build_shard(&factory, Role::Coordinator);
    session.execute(shard).await
}

/// Run `algorithm` against remote worker services
///
/// `endpoints[i]` hosts worker `options.workers[i]`; the two lists must have
/// the same length. Connections are opened in list order. Any connection or
/// handshake failure is a configuration error and nothing is executed.
pub async fn run_remote<P, A, F>(
    algorithm: &mut A,
    shards: F,
    stopping: StoppingCriteria<A>,
    options: RunOptions,
    endpoints: &[String],
) -> RunResult<A::Query, A::Answer>
where
    A: Algorithm<P>,
    A::Query: Serialize,
    A::Answer: DeserializeOwned,
    A::View: Serialize,
    F: ShardFactory<P>,
{
    let started = Instant::now();
    let checked = check_workers(&options.workers).and_then(|()| {
        if endpoints.len() != options.workers.len() {
            anyhow::bail!(
                "{} endpoints given for {} workers",
                endpoints.len(),
                options.workers.len()
            );
        }
        Ok(())
    });
    if let Err(error) = checked {
        return Err(rejected(EngineError::configuration(None, error), started));
    }

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let mut links = Vec::with_capacity(endpoints.len());
    let mut connect_error = None;
    for (&id, address) in options.workers.iter().zip(endpoints) {
        let connected = distributed::connect_worker::<A::View, A::Query, A::Answer>(
            id,
            address,
            event_tx.clone(),
            options.startup_timeout,
        )
        .await;
        match connected {
            Ok(link) => links.push(link),
            Err(error) => {
                connect_error = Some(EngineError::configuration(Some(id), error));
                break;
            }
        }
    }
    drop(event_tx);

    let session = Session::new(algorithm, stopping, options, links, event_rx, started);
    if let Some(error) = connect_error {
        return session.shutdown(Err(error)).await;
    }
    let shard = shards
        .build(Role::Coordinator)
        .map_err(|error| error.context("Failed to build problem shard for coordinator"));
    session.execute(shard).await
}

/// Blocking wrapper around [`run`] that owns its own tokio runtime
pub fn run_blocking<P, A, F>(
    algorithm: &mut A,
    shards: F,
    stopping: StoppingCriteria<A>,
    options: RunOptions,
) -> RunResult<A::Query, A::Answer>
where
    P: 'static,
    A: Algorithm<P>,
    F: ShardFactory<P>,
{
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            let error = anyhow::Error::new(error).context("Failed to create tokio runtime");
            return Err(rejected(EngineError::configuration(None, error), Instant::now()));
        }
    };
    runtime.block_on(run(algorithm, shards, stopping, options))
}

fn check_workers(workers: &[WorkerId]) -> anyhow::Result<()> {
    if workers.is_empty() {
        anyhow::bail!("At least one worker is required");
    }
    let mut seen = BTreeSet::new();
    for id in workers {
        if !seen.insert(*id) {
            anyhow::bail!("Worker {} is registered twice", id);
        }
    }
    Ok(())
}

/// Failure before any worker existed: empty history
fn rejected<Q, A>(error: EngineError, started: Instant) -> RunFailure<Q, A> {
    warn!(error = %error, "run rejected");
    RunFailure {
        error,
        history: HistoryRecorder::new(false).finish(
            Vec::new(),
            Some(StopReason::Failed),
            0,
            started.elapsed(),
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initializing,
    Running,
    Draining,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Phase::Initializing => "initializing",
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::Terminated => "terminated",
        };
        f.write_str(text)
    }
}

/// What woke the coordinator up
enum Wake<A> {
    Event(Event<A>),
    Closed,
    Deadline,
    Cancelled,
}

async fn sleep_until(deadline: Option<Deadline>) {
    match deadline {
        Some(deadline) => tokio_time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn cancelled(token: Option<&CancelToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// State of one run, from Initializing to Terminated
struct Session<'a, P, A: Algorithm<P>> {
    algorithm: &'a mut A,
    criteria: StoppingCriteria<A>,
    options: RunOptions,
    links: BTreeMap<WorkerId, WorkerLink<A::View, A::Query>>,
    slots: BTreeMap<WorkerId, WorkerSlot<A::Query>>,
    events: mpsc::UnboundedReceiver<Event<A::Answer>>,
    recorder: HistoryRecorder<A::Query, A::Answer>,
    epochs: EpochTracker,
    started: Instant,
    phase: Phase,
}

impl<'a, P, A: Algorithm<P>> Session<'a, P, A> {
    fn new(
        algorithm: &'a mut A,
        criteria: StoppingCriteria<A>,
        options: RunOptions,
        links: Vec<WorkerLink<A::View, A::Query>>,
        events: mpsc::UnboundedReceiver<Event<A::Answer>>,
        started: Instant,
    ) -> Self {
        let ids: Vec<WorkerId> = links.iter().map(WorkerLink::id).collect();
        let slots = ids.iter().map(|&id| (id, WorkerSlot::new(id))).collect();
        let links = links.into_iter().map(|link| (link.id(), link)).collect();
        let recorder = HistoryRecorder::new(options.record_answers);

        Self {
            algorithm,
            criteria,
            options,
            links,
            slots,
            events,
            recorder,
            epochs: EpochTracker::new(&ids),
            started,
            phase: Phase::Initializing,
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
    }

    async fn execute(mut self, shard: anyhow::Result<P>) -> RunResult<A::Query, A::Answer> {
        debug!(phase = %self.phase, workers = self.links.len(), "run starting");
        if self.criteria.is_unbounded() && self.options.cancel.is_none() {
            warn!("No stopping bound and no cancel token: the run ends only on failure");
        }

        let shard = match shard {
            Ok(shard) => shard,
            Err(error) => return self.shutdown(Err(EngineError::configuration(None, error))).await,
        };

        match self.await_ready().await {
            Ok(None) => {}
            Ok(Some(reason)) => return self.shutdown(Ok(reason)).await,
            Err(error) => return self.shutdown(Err(error)).await,
        }

        let first = match self.algorithm.initialize(&shard) {
            Ok(query) => query,
            Err(error) => {
                let error = EngineError::callback(Callback::Initialize, None, error);
                return self.shutdown(Err(error)).await;
            }
        };

        // A bound may already hold before any step, e.g. `iterations(0)`
        let progress = Progress {
            iteration: 0,
            elapsed: self.started.elapsed(),
            epochs: 0,
        };
        if let Some(reason) = self.criteria.evaluate(&*self.algorithm, &progress) {
            return self.shutdown(Ok(reason)).await;
        }
        let view = self.algorithm.view();
        let ids: Vec<WorkerId> = self.links.keys().copied().collect();
        for id in ids {
            if let Err(error) = self.dispatch(id, view.clone(), first.clone()) {
                return self.shutdown(Err(error)).await;
            }
        }

        self.enter(Phase::Running);
        let outcome = self.run_loop(&shard).await;
        self.shutdown(outcome).await
    }

    /// Single multi-source wait: any worker event, the deadline or cancellation
    async fn wait(&mut self, deadline: Option<Deadline>) -> Wake<A::Answer> {
        let cancel = self.options.cancel.clone();
        tokio::select! {
            event = self.events.recv() => match event {
                Some(event) => Wake::Event(event),
                None => Wake::Closed,
            },
            _ = sleep_until(deadline) => Wake::Deadline,
            _ = cancelled(cancel.as_ref()) => Wake::Cancelled,
        }
    }

    /// Wall-time deadline of the run, measured from Initializing
    fn time_deadline(&self) -> Option<Deadline> {
        self.criteria
            .max_duration()
            .map(|limit| Deadline::from_std(self.started) + limit)
    }

    /// Wait for every worker to report Ready
    ///
    /// Returns a stop reason if the run was cancelled or hit its time bound
    /// before every worker was ready.
    async fn await_ready(&mut self) -> Result<Option<StopReason>, EngineError> {
        let startup = Deadline::now() + self.options.startup_timeout;
        let time_bound = self.time_deadline().filter(|&bound| bound <= startup);
        let deadline = time_bound.unwrap_or(startup);

        while let Some(waiting) = self.slots.values().find(|slot| slot.is_starting()).map(WorkerSlot::id) {
            match self.wait(Some(deadline)).await {
                Wake::Cancelled => return Ok(Some(StopReason::Cancelled)),
                Wake::Deadline if time_bound.is_some() => {
                    info!(worker = %waiting, "time bound reached while workers were starting");
                    return Ok(Some(StopReason::TimeLimit));
                }
                Wake::Deadline => {
                    let error = anyhow!(
                        "Worker not ready within {}",
                        format_duration(self.options.startup_timeout)
                    );
                    self.fail_slot(waiting, &error);
                    return Err(EngineError::configuration(Some(waiting), error));
                }
                Wake::Closed => {
                    return Err(EngineError::transport(None, anyhow!("Every worker went away during startup")));
                }
                Wake::Event(Event::Ready { worker }) => {
                    if let Some(slot) = self.slots.get_mut(&worker) {
                        slot.mark_ready();
                    }
                    debug!(worker = %worker, "worker registered");
                }
                Wake::Event(Event::Failed { worker, error, .. }) => {
                    self.fail_slot(worker, &error);
                    return Err(EngineError::configuration(Some(worker), error));
                }
                Wake::Event(Event::Disconnected { worker, reason }) => {
                    let error = anyhow!(reason);
                    self.fail_slot(worker, &error);
                    return Err(EngineError::configuration(Some(worker), error));
                }
                Wake::Event(Event::Stopped { worker }) => {
                    if let Some(slot) = self.slots.get_mut(&worker) {
                        slot.mark_stopped();
                    }
                    let error = anyhow!("Worker stopped before it was ready");
                    self.fail_slot(worker, &error);
                    return Err(EngineError::configuration(Some(worker), error));
                }
                Wake::Event(Event::Answer { worker, .. }) => {
                    warn!(worker = %worker, "answer before any query was sent, ignoring");
                }
            }
        }
        Ok(None)
    }

    async fn run_loop(&mut self, shard: &P) -> Result<StopReason, EngineError> {
        let deadline = self.time_deadline();

        loop {
            match self.wait(deadline).await {
                Wake::Cancelled => return Ok(StopReason::Cancelled),
                Wake::Deadline => return Ok(StopReason::TimeLimit),
                Wake::Closed => {
                    return Err(EngineError::transport(None, anyhow!("Every worker channel closed while running")));
                }
                Wake::Event(event) => {
                    if let Some(reason) = self.handle(event, shard)? {
                        return Ok(reason);
                    }
                }
            }
        }
    }

    fn handle(&mut self, event: Event<A::Answer>, shard: &P) -> Result<Option<StopReason>, EngineError> {
        match event {
            Event::Answer { worker, answer } => self.accept(worker, answer, shard),
            Event::Failed { worker, stage, error } => {
                self.fail_slot(worker, &error);
                Err(match stage {
                    Stage::Step => EngineError::callback(Callback::WorkerStep, Some(worker), error),
                    Stage::Setup => EngineError::configuration(Some(worker), error),
                })
            }
            Event::Disconnected { worker, reason } => {
                let error = anyhow!(reason);
                self.fail_slot(worker, &error);
                Err(EngineError::transport(Some(worker), error))
            }
            Event::Stopped { worker } => {
                if let Some(slot) = self.slots.get_mut(&worker) {
                    slot.mark_stopped();
                }
                let error = anyhow!("Worker stopped without being asked to");
                self.fail_slot(worker, &error);
                Err(EngineError::transport(Some(worker), error))
            }
            Event::Ready { worker } => {
                debug!(worker = %worker, "duplicate ready ignored");
                Ok(None)
            }
        }
    }

    /// Apply one answer; returns the stop reason if the run is done
    fn accept(
        &mut self,
        worker: WorkerId,
        answer: A::Answer,
        shard: &P,
    ) -> Result<Option<StopReason>, EngineError> {
        let slot = self
            .slots
            .get_mut(&worker)
            .ok_or_else(|| EngineError::transport(Some(worker), anyhow!("Answer from unregistered worker")))?;
        if let Err(error) = slot.accept() {
            slot.fail(&error);
            return Err(EngineError::transport(Some(worker), error));
        }

        let retained = self.recorder.wants_answers().then(|| answer.clone());
        let next = match self.algorithm.coordinator_step(answer, worker, shard) {
            Ok(query) => query,
            Err(error) => {
                slot.fail(&error);
                return Err(EngineError::callback(Callback::CoordinatorStep, Some(worker), error));
            }
        };

        let elapsed = self.started.elapsed();
        let iteration = self.recorder.push(worker, next.clone(), retained, elapsed);
        if self.epochs.record(worker) {
            debug!(epoch = self.epochs.completed(), iteration, "epoch complete");
        }
        if let Some(every) = self.options.progress_every {
            if every > 0 && iteration % every == 0 {
                info!(
                    iteration,
                    epochs = self.epochs.completed(),
                    elapsed = %format_duration(elapsed),
                    "progress"
                );
            }
        }

        let progress = Progress {
            iteration,
            elapsed,
            epochs: self.epochs.completed(),
        };
        if let Some(reason) = self.criteria.evaluate(&*self.algorithm, &progress) {
            return Ok(Some(reason));
        }

        let view = self.algorithm.view();
        self.dispatch(worker, view, next)?;
        Ok(None)
    }

    fn dispatch(&mut self, worker: WorkerId, view: A::View, query: A::Query) -> Result<(), EngineError> {
        let (Some(slot), Some(link)) = (self.slots.get_mut(&worker), self.links.get(&worker)) else {
            return Err(EngineError::transport(Some(worker), anyhow!("Query for unregistered worker")));
        };
        slot.dispatch(query.clone())
            .map_err(|error| EngineError::transport(Some(worker), error))?;
        if let Err(error) = link.send_query(view, query) {
            slot.fail(&error);
            return Err(EngineError::transport(Some(worker), error));
        }
        Ok(())
    }

    fn fail_slot(&mut self, worker: WorkerId, error: &anyhow::Error) {
        if let Some(slot) = self.slots.get_mut(&worker) {
            slot.fail(error);
        }
    }

    /// Send Stop everywhere and wait at most the grace period for acknowledgments
    async fn drain(&mut self) {
        self.enter(Phase::Draining);

        for (id, link) in &self.links {
            if let Some(slot) = self.slots.get_mut(id) {
                if slot.status() == WorkerStatus::Stopped {
                    continue;
                }
                slot.begin_stop(link.stop());
            }
        }

        let deadline = Deadline::now() + self.options.grace_period;
        while self.slots.values().any(WorkerSlot::is_stopping) {
            let event = match tokio_time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) | Err(_) => break,
            };
            let worker = event.worker();
            let Some(slot) = self.slots.get_mut(&worker) else {
                continue;
            };
            match event {
                Event::Stopped { .. } => slot.mark_stopped(),
                Event::Disconnected { reason, .. } => {
                    debug!(worker = %worker, reason = %reason, "worker gone while draining");
                    slot.mark_exited();
                }
                Event::Answer { .. } => {
                    warn!(worker = %worker, "discarding answer received while draining");
                    slot.discard_outstanding();
                }
                Event::Failed { error, .. } => {
                    warn!(worker = %worker, error = %format!("{:#}", error), "worker failed while draining");
                    slot.discard_outstanding();
                }
                Event::Ready { .. } => {}
            }
        }

        for slot in self.slots.values_mut() {
            if slot.is_stopping() {
                warn!(worker = %slot.id(), "worker did not acknowledge stop, abandoning");
                slot.abandon();
            }
        }
        for link in std::mem::take(&mut self.links).into_values() {
            link.release();
        }
    }

    async fn shutdown(mut self, outcome: Result<StopReason, EngineError>) -> RunResult<A::Query, A::Answer> {
        match &outcome {
            Ok(reason) => info!(reason = %reason, iterations = self.recorder.len(), "run stopping"),
            Err(error) => warn!(error = %error, iterations = self.recorder.len(), "run aborting"),
        }

        self.drain().await;
        self.enter(Phase::Terminated);

        let elapsed = self.started.elapsed();
        let workers = self.slots.values().map(WorkerSlot::summary).collect();
        let epochs = self.epochs.completed();
        match outcome {
            Ok(reason) => Ok(self.recorder.finish(workers, Some(reason), epochs, elapsed)),
            Err(error) => Err(RunFailure {
                error,
                history: self.recorder.finish(workers, Some(StopReason::Failed), epochs, elapsed),
            }),
        }
    }
}
