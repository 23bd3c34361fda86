//! Coordinator-side link to a remote worker service
//!
//! After the ASSIGN/READY handshake the TCP stream is split in two tasks:
//! a writer that turns [`Command`]s from the [`WorkerLink`] into frames, and
//! a reader that turns reply frames into [`Event`]s on the coordinator's
//! shared event channel. From the coordinator's point of view a remote
//! worker is indistinguishable from a local one.

use crate::algorithm::WorkerId;
use crate::distributed::protocol::*;
use crate::worker::{Command, Event, WorkerLink};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Connect to a worker service, assign `id` and wait for READY
///
/// `timeout` bounds the connect and, separately, the shard build on the
/// service side. On success [`Event::Ready`] has already been queued on
/// `events`.
pub async fn connect_worker<V, Q, A>(
    id: WorkerId,
    address: &str,
    events: mpsc::UnboundedSender<Event<A>>,
    timeout: Duration,
) -> Result<WorkerLink<V, Q>>
where
    V: Serialize + Send + 'static,
    Q: Serialize + Send + 'static,
    A: DeserializeOwned + Send + 'static,
{
    let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .with_context(|| format!("Timed out connecting to {}", address))?
        .with_context(|| format!("Failed to connect to {}", address))?;
    stream.set_nodelay(true).context("Failed to set TCP_NODELAY")?;
    let (mut reader, mut writer) = stream.into_split();

    let assign: Request<V, Q> = Request::Assign(AssignMessage {
        protocol_version: PROTOCOL_VERSION,
        worker: id,
    });
    write_message(&mut writer, &assign).await?;

    let reply = tokio::time::timeout(timeout, read_message::<Reply<A>, _>(&mut reader))
        .await
        .with_context(|| format!("Timed out waiting for READY from {}", address))??;
    match reply {
        Reply::Ready(ready) => {
            if ready.protocol_version != PROTOCOL_VERSION {
                anyhow::bail!(
                    "Protocol version mismatch: coordinator={}, service={}",
                    PROTOCOL_VERSION,
                    ready.protocol_version
                );
            }
            if ready.worker != id {
                anyhow::bail!("Service at {} acknowledged worker {} instead of {}", address, ready.worker, id);
            }
            info!(worker = %id, node = %ready.node_id, address, "remote worker ready");
        }
        Reply::Failure(failure) => {
            anyhow::bail!("Worker service {} failed to set up: {}", failure.node_id, failure.error);
        }
        other => anyhow::bail!("Expected READY from {}, got {}", address, other.kind()),
    }

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    tokio::spawn(forward_commands(id, writer, command_rx, events.clone()));
    tokio::spawn(forward_replies(id, reader, events.clone()));
    let _ = events.send(Event::Ready { worker: id });

    Ok(WorkerLink::new(id, command_tx))
}

/// Writer task: link commands → frames
async fn forward_commands<V, Q, A>(
    id: WorkerId,
    mut writer: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<Command<V, Q>>,
    events: mpsc::UnboundedSender<Event<A>>,
) where
    V: Serialize,
    Q: Serialize,
{
    while let Some(command) = commands.recv().await {
        let frame = match command {
            Command::Query { view, query } => Request::Query { view, query },
            Command::Stop => Request::Stop,
        };
        if let Err(e) = write_message(&mut writer, &frame).await {
            let _ = events.send(Event::Disconnected {
                worker: id,
                reason: format!("{:#}", e),
            });
            return;
        }
    }
    debug!(worker = %id, "command channel closed, closing connection");
}

/// Reader task: reply frames → coordinator events
async fn forward_replies<A>(id: WorkerId, mut reader: OwnedReadHalf, events: mpsc::UnboundedSender<Event<A>>)
where
    A: DeserializeOwned,
{
    loop {
        let event = match read_message::<Reply<A>, _>(&mut reader).await {
            Ok(Reply::Answer(answer)) => Event::Answer { worker: id, answer },
            Ok(Reply::Failure(failure)) => Event::Failed {
                worker: id,
                stage: failure.stage,
                error: anyhow::anyhow!("{} (on {})", failure.error, failure.node_id),
            },
            Ok(Reply::Stopped) => {
                let _ = events.send(Event::Stopped { worker: id });
                return;
            }
            Ok(other) => {
                let _ = events.send(Event::Disconnected {
                    worker: id,
                    reason: format!("Unexpected {} frame", other.kind()),
                });
                return;
            }
            Err(e) => {
                let _ = events.send(Event::Disconnected {
                    worker: id,
                    reason: format!("Connection lost: {:#}", e),
                });
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_writer_task_accepts_non_sync_payloads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();
        let (_reader, writer) = client.into_split();

        // Cell is Send but not Sync
        let (command_tx, command_rx) = mpsc::unbounded_channel::<Command<Cell<i64>, Cell<i64>>>();
        let (event_tx, _event_rx) = mpsc::unbounded_channel::<Event<Cell<i64>>>();
        let writer_task = tokio::spawn(forward_commands(WorkerId(1), writer, command_rx, event_tx));

        command_tx
            .send(Command::Query {
                view: Cell::new(2),
                query: Cell::new(21),
            })
            .unwrap();
        command_tx.send(Command::Stop).unwrap();

        match read_message::<Request<i64, i64>, _>(&mut server).await.unwrap() {
            Request::Query { view, query } => assert_eq!(view * query, 42),
            other => panic!("expected QUERY, got {}", other.kind()),
        }
        let stop: Request<i64, i64> = read_message(&mut server).await.unwrap();
        assert!(matches!(stop, Request::Stop));

        drop(command_tx);
        writer_task.await.unwrap();
    }
}
