//! Daemon orchestration: socket accept loop, per-connection tasks and the
//! broker event loop.

use std::collections::HashMap;
use std::time::Duration;

use imbus_protocol::{MessageReceiver, MessageSender, PeerConnection, ProtocolError, UnixTransport};
use imbus_types::{ContextId, Message};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::config::Config;
use crate::connection::ConnId;
use crate::error::DaemonError;

/// How long shutdown waits for a writer to flush its queue.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Events processed by the daemon's main loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A decoded message from a connection.
    Inbound { conn: ConnId, msg: Message },
    /// A frame from a connection was rejected.
    Violation {
        conn: ConnId,
        serial: Option<u32>,
        reason: String,
    },
    /// A connection's stream ended or failed.
    Disconnected(ConnId),
    /// Shutdown signal.
    Shutdown,
}

/// Snapshot of broker state, published after every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonStatus {
    pub connections: usize,
    pub contexts: usize,
    pub factories: usize,
    pub engines: usize,
    pub focused: Option<ContextId>,
    pub panel_registered: bool,
    pub config_registered: bool,
}

/// The imbus daemon.
pub struct Daemon {
    broker: Broker,
    transport: UnixTransport,
    queue_capacity: usize,
    readers: HashMap<ConnId, JoinHandle<()>>,
    writers: HashMap<ConnId, JoinHandle<()>>,
    event_tx: mpsc::Sender<DaemonEvent>,
    event_rx: mpsc::Receiver<DaemonEvent>,
    status_tx: watch::Sender<DaemonStatus>,
}

impl Daemon {
    /// Create a daemon serving the bus on an already bound socket.
    pub fn new(config: &Config, transport: UnixTransport) -> Result<Self, DaemonError> {
        let broker = Broker::new(config)?;
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (status_tx, _) = watch::channel(broker.status());
        Ok(Self {
            broker,
            transport,
            queue_capacity: config.daemon.queue_capacity.max(1),
            readers: HashMap::new(),
            writers: HashMap::new(),
            event_tx,
            event_rx,
            status_tx,
        })
    }

    /// Get a clone of the event sender for feeding events into the daemon.
    pub fn event_sender(&self) -> mpsc::Sender<DaemonEvent> {
        self.event_tx.clone()
    }

    /// Watch broker state; updated after every processed event.
    pub fn status_receiver(&self) -> watch::Receiver<DaemonStatus> {
        self.status_tx.subscribe()
    }

    /// Run until `Shutdown` arrives or a peer calls `Kill`.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        info!(
            socket = %self.transport.local_path().display(),
            guid = %self.broker.guid(),
            "daemon listening"
        );

        loop {
            tokio::select! {
                result = self.transport.accept() => {
                    match result {
                        Ok(conn) => self.handle_incoming_connection(conn),
                        Err(e) => debug!(error = %e, "accept error"),
                    }
                }
                event = self.event_rx.recv() => {
                    match event {
                        Some(DaemonEvent::Inbound { conn, msg }) => {
                            self.broker.dispatch(conn, msg);
                        }
                        Some(DaemonEvent::Violation { conn, serial, reason }) => {
                            self.broker.violation(conn, serial, &reason);
                        }
                        Some(DaemonEvent::Disconnected(conn)) => {
                            self.readers.remove(&conn);
                            self.broker.disconnect(conn);
                        }
                        Some(DaemonEvent::Shutdown) | None => {
                            info!("shutting down");
                            break;
                        }
                    }
                }
            }

            self.reap_closed();
            self.publish_status();
            if self.broker.shutdown_requested() {
                break;
            }
        }

        self.shutdown().await
    }

    fn handle_incoming_connection(&mut self, conn: PeerConnection) {
        let pid = conn.peer_pid();
        let (queue_tx, queue_rx) = mpsc::channel(self.queue_capacity);
        let id = self.broker.connect(queue_tx);
        debug!(conn = %id, pid = ?pid, "handling incoming connection");

        let (sender, receiver) = conn.into_split();
        self.writers
            .insert(id, tokio::spawn(write_loop(id, sender, queue_rx)));
        self.readers.insert(
            id,
            tokio::spawn(read_loop(id, receiver, self.event_tx.clone())),
        );
        self.publish_status();
    }

    /// Stop reading from connections the broker dropped on its own.
    fn reap_closed(&mut self) {
        for conn in self.broker.take_closed() {
            if let Some(reader) = self.readers.remove(&conn) {
                reader.abort();
            }
        }
        self.writers.retain(|_, writer| !writer.is_finished());
    }

    fn publish_status(&self) {
        let status = self.broker.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    async fn shutdown(&mut self) -> Result<(), DaemonError> {
        info!("daemon shutting down");

        for (_, reader) in self.readers.drain() {
            reader.abort();
        }

        // Dropping the queues lets each writer flush what is left and close.
        self.broker.close_all();
        for (conn, writer) in self.writers.drain() {
            if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
                warn!(conn = %conn, "writer did not drain in time");
            }
        }

        self.transport.close();
        self.publish_status();

        info!("daemon shut down complete");
        Ok(())
    }
}

async fn write_loop(conn: ConnId, mut sender: MessageSender, mut queue: mpsc::Receiver<Message>) {
    while let Some(msg) = queue.recv().await {
        if let Err(e) = sender.send(&msg).await {
            debug!(conn = %conn, error = %e, "write failed");
            return;
        }
    }
    let _ = sender.finish().await;
}

async fn read_loop(conn: ConnId, mut receiver: MessageReceiver, events: mpsc::Sender<DaemonEvent>) {
    loop {
        let event = match receiver.recv().await {
            Ok(Some(msg)) => DaemonEvent::Inbound { conn, msg },
            Ok(None) => break,
            Err(ProtocolError::Violation { serial, reason }) => DaemonEvent::Violation {
                conn,
                serial,
                reason,
            },
            Err(e) if !e.is_fatal() => DaemonEvent::Violation {
                conn,
                serial: None,
                reason: e.to_string(),
            },
            Err(e) => {
                debug!(conn = %conn, error = %e, "read failed");
                break;
            }
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
    let _ = events.send(DaemonEvent::Disconnected(conn)).await;
}
