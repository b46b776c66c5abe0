//! WebSocket transport implementation.
//!
//! Client side, built on tokio-tungstenite. Every WebSocket binary message
//! carries length-prefixed frames; a frame may span messages.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashpulse_protocol::{codec, Frame, ProtocolError};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};

use crate::traits::{Connection, ConnectionId, Transport, TransportError};

/// Default maximum message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Server endpoint, `ws://` or `wss://`.
    pub url: String,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl WebSocketConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// WebSocket transport.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Transport for `url` with default limits.
    #[must_use]
    pub fn connect_to(url: impl Into<String>) -> Self {
        Self::new(WebSocketConfig::new(url))
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (ws_stream, response) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| {
                debug!("WebSocket connect to {} failed: {}", self.config.url, e);
                TransportError::ConnectFailed(e.to_string())
            })?;

        debug!(
            "WebSocket handshake completed with {} ({})",
            self.config.url,
            response.status()
        );

        let conn = WebSocketConnection::new(ws_stream, self.config.max_message_size);
        Ok(Box::new(conn))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }

    fn endpoint(&self) -> String {
        self.config.url.clone()
    }
}

/// A WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    is_open: bool,
    read_buffer: BytesMut,
    max_message_size: usize,
}

impl WebSocketConnection {
    fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, max_message_size: usize) -> Self {
        Self {
            id: ConnectionId::generate(),
            stream,
            is_open: true,
            read_buffer: BytesMut::with_capacity(4096),
            max_message_size,
        }
    }

    fn buffer(&mut self, data: &[u8]) -> Result<Option<Frame>, TransportError> {
        if data.len() > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                data.len(),
                self.max_message_size
            );
            return Err(TransportError::Protocol(ProtocolError::FrameTooLarge(
                data.len(),
            )));
        }
        self.read_buffer.extend_from_slice(data);
        Ok(codec::decode_from(&mut self.read_buffer)?)
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        if let Some(frame) = codec::decode_from(&mut self.read_buffer)? {
            return Ok(Some(frame));
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    if let Some(frame) = self.buffer(&data)? {
                        return Ok(Some(frame));
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if let Some(frame) = self.buffer(text.as_bytes())? {
                        return Ok(Some(frame));
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    debug!("WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let data = codec::encode(&frame)?;
        self.send_raw(data).await
    }

    async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        self.stream
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;

        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {}", e))),
        }
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
