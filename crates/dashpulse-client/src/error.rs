//! Client errors.

use dashpulse_core::{RegistryError, SubscriptionId};
use dashpulse_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`SyncClient`](crate::SyncClient).
///
/// Cloneable so one connection outcome can be handed to every caller waiting
/// on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// No credential was available when a connection was requested.
    #[error("No credential available")]
    MissingCredential,

    /// The operation needs an established connection.
    #[error("Not connected")]
    NotConnected,

    /// No subscription with this id.
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    /// Connection establishment exceeded the configured timeout.
    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The server refused the session.
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// The server speaks an incompatible protocol version.
    #[error("Incompatible server protocol version {server}")]
    IncompatibleVersion { server: String },

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// `disconnect()` was called while the connection was being established.
    #[error("Disconnected before the connection was established")]
    Disconnected,

    /// The engine task is gone.
    #[error("Synchronization engine stopped")]
    EngineStopped,
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<RegistryError> for ClientError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownSubscription(id) => Self::UnknownSubscription(id),
        }
    }
}
