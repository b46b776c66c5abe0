//! In-process transport.
//!
//! Connections are pairs of channels carrying encoded frames, so everything
//! that goes through a [`MemoryConnection`] also goes through the codec. The
//! server half of each connection is handed to a [`MemoryListener`]; dropping
//! it looks like a lost connection to the client.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashpulse_protocol::{codec, Frame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::traits::{Connection, ConnectionId, Transport, TransportError};

#[derive(Debug, Default)]
struct Shared {
    refusing: AtomicBool,
    opens: Mutex<Vec<Instant>>,
}

/// Client half of an in-process transport.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<MemoryConnection>,
    shared: Arc<Shared>,
}

/// Server half: yields the peer end of every connection the client opens.
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryConnection>,
}

impl MemoryTransport {
    /// Create a connected transport/listener pair.
    #[must_use]
    pub fn pair() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let transport = Self {
            accept_tx,
            shared: Arc::new(Shared::default()),
        };
        (transport, MemoryListener { accept_rx })
    }

    /// Make subsequent opens fail, as if the server were unreachable.
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Instants of every open attempt, successful or not.
    #[must_use]
    pub fn open_attempts(&self) -> Vec<Instant> {
        self.shared
            .opens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<Box<dyn Connection>, TransportError> {
        self.shared
            .opens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());

        if self.shared.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed("connection refused".into()));
        }

        let (client, server) = MemoryConnection::pair();
        self.accept_tx
            .send(server)
            .map_err(|_| TransportError::ConnectFailed("listener dropped".into()))?;

        debug!(connection = %client.id, "Memory connection opened");
        Ok(Box::new(client))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl MemoryListener {
    /// Wait for the client to open a connection.
    ///
    /// Returns `None` once every [`MemoryTransport`] clone is gone.
    pub async fn accept(&mut self) -> Option<MemoryConnection> {
        self.accept_rx.recv().await
    }
}

/// One end of an in-process connection.
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    read_buffer: BytesMut,
}

impl MemoryConnection {
    /// Two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let id = ConnectionId::generate();
        (
            Self {
                id: id.clone(),
                tx: Some(a_tx),
                rx: b_rx,
                read_buffer: BytesMut::new(),
            },
            Self {
                id,
                tx: Some(b_tx),
                rx: a_rx,
                read_buffer: BytesMut::new(),
            },
        )
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            if let Some(frame) = codec::decode_from(&mut self.read_buffer)? {
                return Ok(Some(frame));
            }
            match self.rx.recv().await {
                Some(data) => self.read_buffer.extend_from_slice(&data),
                None => return Ok(None),
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let data = codec::encode(&frame)?;
        self.send_raw(data).await
    }

    async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(data).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}
