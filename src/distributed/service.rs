//! Worker service for remote workers
//!
//! The service runs on a worker host and hosts one worker execution unit per
//! coordinator connection:
//! - Accepts a connection and reads ASSIGN (worker id + protocol version)
//! - Builds the shard for that worker with its own [`ShardFactory`]
//! - Answers QUERY frames one at a time until STOP
//!
//! Shard construction and `worker_step` run on tokio's blocking pool, so a
//! long step never stalls the accept loop or other connections.

use crate::algorithm::{Role, WorkerId, WorkerView};
use crate::distributed::protocol::*;
use crate::problem::{build_shard, ShardFactory};
use crate::worker::{guarded_step, Stage};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Process-level worker service
///
/// `P` is the shard type and `V` the algorithm's worker view.
pub struct WorkerService<P, V, F> {
    factory: Arc<F>,
    node_id: String,
    _types: PhantomData<fn() -> (P, V)>,
}

impl<P, V, F> WorkerService<P, V, F>
where
    P: Send + Sync + 'static,
    V: WorkerView<P> + DeserializeOwned,
    V::Query: DeserializeOwned + Send + 'static,
    V::Answer: Serialize + Send + 'static,
    F: ShardFactory<P>,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            node_id: get_node_id(),
            _types: PhantomData,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Listen on `0.0.0.0:port` until the process is stopped
    pub async fn run(self, port: u16) -> Result<()> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind worker service on {}", addr))?;
        self.serve(listener).await
    }

    /// Accept coordinator connections on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr().context("Failed to read listener address")?;
        info!(node = %self.node_id, address = %local, "worker service listening");

        loop {
            let (stream, peer) = listener.accept().await.context("Failed to accept connection")?;
            debug!(peer = %peer, "coordinator connected");

            let factory = Arc::clone(&self.factory);
            let node_id = self.node_id.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection::<P, V, F>(stream, peer, factory, node_id).await {
                    warn!(peer = %peer, error = %format!("{:#}", e), "connection ended with error");
                }
            });
        }
    }
}

/// Host one worker for the lifetime of a connection
async fn handle_connection<P, V, F>(
    mut stream: TcpStream,
    peer: SocketAddr,
    factory: Arc<F>,
    node_id: String,
) -> Result<()>
where
    P: Send + Sync + 'static,
    V: WorkerView<P> + DeserializeOwned,
    V::Query: DeserializeOwned + Send + 'static,
    V::Answer: Serialize + Send + 'static,
    F: ShardFactory<P>,
{
    stream.set_nodelay(true).context("Failed to set TCP_NODELAY")?;

    let worker = match read_message::<Request<V, V::Query>, _>(&mut stream).await? {
        Request::Assign(assign) => {
            if assign.protocol_version != PROTOCOL_VERSION {
                let error = format!(
                    "Protocol version mismatch: coordinator={}, service={}",
                    assign.protocol_version, PROTOCOL_VERSION
                );
                send_failure::<V::Answer>(&mut stream, &node_id, Stage::Setup, error.clone()).await?;
                anyhow::bail!(error);
            }
            assign.worker
        }
        other => anyhow::bail!("Expected ASSIGN, got {}", other.kind()),
    };
    info!(worker = %worker, peer = %peer, "worker assigned");

    let shard = match build_remote_shard(&factory, worker).await {
        Ok(shard) => Arc::new(shard),
        Err(e) => {
            send_failure::<V::Answer>(&mut stream, &node_id, Stage::Setup, format!("{:#}", e)).await?;
            return Err(e);
        }
    };

    let ready: Reply<V::Answer> = Reply::Ready(ReadyMessage {
        protocol_version: PROTOCOL_VERSION,
        node_id: node_id.clone(),
        worker,
    });
    write_message(&mut stream, &ready).await?;

    loop {
        let request = read_message::<Request<V, V::Query>, _>(&mut stream)
            .await
            .with_context(|| format!("Lost coordinator connection for worker {}", worker))?;

        match request {
            Request::Query { view, query } => {
                let step_shard = Arc::clone(&shard);
                let outcome = tokio::task::spawn_blocking(move || guarded_step(&view, &query, &*step_shard))
                    .await
                    .context("Worker step task failed")?;
                match outcome {
                    Ok(answer) => {
                        let reply: Reply<V::Answer> = Reply::Answer(answer);
                        write_message(&mut stream, &reply).await?
                    }
                    Err(e) => {
                        send_failure::<V::Answer>(&mut stream, &node_id, Stage::Step, format!("{:#}", e)).await?
                    }
                }
            }
            Request::Stop => {
                let stopped: Reply<V::Answer> = Reply::Stopped;
                write_message(&mut stream, &stopped).await?;
                info!(worker = %worker, "worker stopped");
                return Ok(());
            }
            Request::Assign(_) => anyhow::bail!("Unexpected second ASSIGN for worker {}", worker),
        }
    }
}

async fn build_remote_shard<P, F>(factory: &Arc<F>, worker: WorkerId) -> Result<P>
where
    P: Send + 'static,
    F: ShardFactory<P>,
{
    let factory = Arc::clone(factory);
    tokio::task::spawn_blocking(move || build_shard(&factory, Role::Worker(worker)))
        .await
        .context("Shard builder task failed")?
}

async fn send_failure<A: Serialize>(
    stream: &mut TcpStream,
    node_id: &str,
    stage: Stage,
    error: String,
) -> Result<()> {
    let failure: Reply<A> = Reply::Failure(ErrorMessage {
        node_id: node_id.to_string(),
        stage,
        error,
    });
    write_message(stream, &failure).await
}

/// Host name, or "unknown"
fn get_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
