//! # dashpulse-protocol
//!
//! Wire protocol definitions for the dashpulse dashboard synchronization client.
//!
//! This crate defines the frames exchanged between a dashboard client and its
//! backend, the length-prefixed MessagePack codec, and version negotiation.
//!
//! ## Frame Families
//!
//! - `connect` / `connected` / `ping` / `pong` - Session handshake and keepalive
//! - `subscribe-to-dashboard` / `unsubscribe-from-dashboard` - Subscription control
//! - `dashboard-data` / `dashboard-update` - Data pushes
//! - `dashboard-notification` and the error frames - Out-of-band signals
//!
//! ## Example
//!
//! ```rust
//! use dashpulse_protocol::{codec, DashboardType, Frame};
//!
//! let frame = Frame::subscribe(
//!     "sub-1",
//!     DashboardType::Executive,
//!     serde_json::json!({"region": "eu"}),
//!     vec!["revenue".to_string()],
//!     None,
//! );
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{DashboardType, DataMap, Frame, NotificationKind, NotificationPayload, Priority};
pub use version::PROTOCOL_VERSION;
