//! Transport abstraction traits for dashpulse.
//!
//! A [`Transport`] knows how to reach the dashboard server. Each call to
//! [`Transport::open`] yields a fresh [`Connection`] carrying protocol frames,
//! so the client can reconnect without knowing what sits underneath.

use async_trait::async_trait;
use bytes::Bytes;
use dashpulse_protocol::Frame;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Locally assigned identifier for one connection, used in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Next id, unique within this process.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server could not be reached.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] dashpulse_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A way of reaching the dashboard server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection to the server.
    ///
    /// Only the transport-level link is established here; the protocol
    /// handshake is the caller's job.
    async fn open(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Transport name (e.g. "websocket", "memory").
    fn name(&self) -> &'static str;

    /// Human-readable target, used in logs.
    fn endpoint(&self) -> String {
        self.name().to_string()
    }
}

/// An open, bidirectional frame stream to the server.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> &ConnectionId;

    /// Receive the next frame.
    ///
    /// Returns `None` once the peer has closed the connection. Must be cancel
    /// safe: dropping the future never loses a decoded frame.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Send a frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Send pre-encoded bytes.
    async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }
}
