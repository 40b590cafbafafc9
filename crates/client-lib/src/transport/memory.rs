//! In-process duplex transport.
//!
//! Every successful [`MemoryConnector::open`] hands the server side of the
//! new connection to the paired [`MemoryListener`]. The [`ServerEnd`] pushes
//! frames, errors and closes into the client and reads what the client sent.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::{Connector, Transport};
use crate::error::ClientError;

#[derive(Debug)]
enum Inbound {
    Frame(String),
    Failed(String),
    Closed,
}

struct Shared {
    accept_tx: mpsc::UnboundedSender<ServerEnd>,
    attempts: Mutex<Vec<Instant>>,
    refuse: AtomicUsize,
    gate: watch::Sender<bool>,
}

/// Connector whose connections end inside the same process
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let (gate, _) = watch::channel(true);
        let connector = Self {
            shared: Arc::new(Shared {
                accept_tx,
                attempts: Mutex::new(Vec::new()),
                refuse: AtomicUsize::new(0),
                gate,
            }),
        };
        (connector, MemoryListener { accept_rx })
    }

    /// Number of `open` calls so far, successful or not
    pub fn attempts(&self) -> usize {
        self.shared.attempts.lock().len()
    }

    /// When each `open` call started
    pub fn attempt_instants(&self) -> Vec<Instant> {
        self.shared.attempts.lock().clone()
    }

    /// Fail the next `count` opens with a connection error
    pub fn refuse_next(&self, count: usize) {
        self.shared.refuse.store(count, Ordering::SeqCst);
    }

    /// Keep subsequent opens pending until [`release_opens`](Self::release_opens)
    pub fn hold_opens(&self) {
        self.shared.gate.send_replace(false);
    }

    pub fn release_opens(&self) {
        self.shared.gate.send_replace(true);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self) -> Result<Box<dyn Transport>, ClientError> {
        self.shared.attempts.lock().push(Instant::now());

        let mut gate = self.shared.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| ClientError::Connection("connector dropped".to_string()))?;

        let refused = self
            .shared
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ClientError::Connection("connection refused".to_string()));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let server = ServerEnd {
            inbound: inbound_tx,
            outbound: outbound_rx,
            client_closed: Arc::clone(&closed),
        };
        self.shared
            .accept_tx
            .send(server)
            .map_err(|_| ClientError::Connection("no listener".to_string()))?;

        Ok(Box::new(MemoryTransport {
            inbound: inbound_rx,
            outbound: outbound_tx,
            closed,
        }))
    }
}

/// Receives the server side of each opened connection
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<ServerEnd>,
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<ServerEnd> {
        self.accept_rx.recv().await
    }

    pub fn try_accept(&mut self) -> Option<ServerEnd> {
        self.accept_rx.try_recv().ok()
    }
}

/// Server side of one in-memory connection. Dropping it closes the
/// connection from the server side.
pub struct ServerEnd {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<String>,
    client_closed: Arc<AtomicBool>,
}

impl ServerEnd {
    /// Deliver a text frame. Returns `false` if the client is gone.
    pub fn push(&self, text: impl Into<String>) -> bool {
        self.inbound.send(Inbound::Frame(text.into())).is_ok()
    }

    pub fn push_json(&self, frame: &serde_json::Value) -> bool {
        self.push(frame.to_string())
    }

    /// Report a transport error to the client; the connection is unusable after it
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.inbound.send(Inbound::Failed(reason.into())).is_ok()
    }

    /// Close the connection cleanly from the server side
    pub fn close(self) {
        let _ = self.inbound.send(Inbound::Closed);
    }

    /// Next frame the client sent
    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    pub fn try_next_sent(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    pub fn is_closed_by_client(&self) -> bool {
        self.client_closed.load(Ordering::SeqCst)
    }
}

struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, text: String) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Connection("connection already closed".to_string()));
        }
        self.outbound
            .send(text)
            .map_err(|_| ClientError::Connection("peer went away".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ClientError>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        match self.inbound.recv().await {
            Some(Inbound::Frame(text)) => Some(Ok(text)),
            Some(Inbound::Failed(reason)) => {
                self.closed.store(true, Ordering::SeqCst);
                Some(Err(ClientError::TransientDisconnect(reason)))
            },
            Some(Inbound::Closed) | None => None,
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
