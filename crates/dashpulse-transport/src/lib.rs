//! # dashpulse-transport
//!
//! Transport abstraction layer for the dashpulse client.
//!
//! - **WebSocket** - The production transport
//! - **Memory** - In-process channel pair, for tests and embedding
//!
//! ## Transport Abstraction
//!
//! Transports implement [`Transport`] and hand out [`Connection`]s, allowing
//! the client to reconnect without caring how bytes move.
//!
//! ```rust,ignore
//! use dashpulse_transport::{Connection, Transport};
//!
//! async fn pump(transport: &dyn Transport) -> Result<(), TransportError> {
//!     let mut conn = transport.open().await?;
//!     while let Some(frame) = conn.recv().await? {
//!         // Process frame
//!     }
//!     Ok(())
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryConnection, MemoryListener, MemoryTransport};
pub use traits::{Connection, ConnectionId, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
