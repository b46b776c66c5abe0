//! # dashpulse-client
//!
//! Real-time dashboard synchronization client.
//!
//! A [`SyncClient`] keeps a set of dashboard subscriptions alive over a
//! persistent connection, reconciles pushed updates with the state already
//! held, and publishes the result through a [`SharedStore`] for UI consumers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  commands   ┌─────────────┐   frames   ┌─────────────┐
//! │ SyncClient  │────────────▶│   Engine    │◀──────────▶│  Transport  │
//! └─────────────┘             └─────────────┘            └─────────────┘
//!        │                           │
//!        │ reads / events            ▼
//!        └──────────────────▶ ┌─────────────┐
//!                             │ SharedStore │
//!                             └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use dashpulse_client::{ClientConfig, StaticCredential, SubscriptionRequest, SyncClient};
//! use dashpulse_core::FilterSet;
//! use dashpulse_protocol::DashboardType;
//! use dashpulse_transport::WebSocketTransport;
//! use std::sync::Arc;
//!
//! let config = ClientConfig::load()?;
//! let client = SyncClient::new(
//!     Arc::new(WebSocketTransport::connect_to(&config.connection.url)),
//!     Arc::new(StaticCredential::new("token")),
//!     &config,
//! );
//!
//! client.connect().await?;
//! let id = client
//!     .subscribe(SubscriptionRequest::new(
//!         DashboardType::Executive,
//!         FilterSet::empty(),
//!         vec!["revenue".into()],
//!     ))
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod connection;
mod engine;
pub mod error;
pub mod metrics;

pub use client::{StatusReport, SubscriptionRequest, SyncClient};
pub use config::ClientConfig;
pub use connection::{
    ConnectionOptions, ConnectionOptionsUpdate, CredentialSource, EnvCredential, StaticCredential,
};
pub use dashpulse_core::{SharedStore, StoreEvent};
pub use error::ClientError;
