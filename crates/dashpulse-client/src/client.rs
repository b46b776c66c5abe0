//! The public client handle.

use dashpulse_core::{
    BufferedEntry, ConflictResolver, DataBuffer, FilterSet, SharedStore, StateKey, StoreEvent,
    StoreWriter, Subscription, SubscriptionId, DEFAULT_EVENT_CAPACITY,
};
use dashpulse_protocol::DashboardType;
use dashpulse_transport::Transport;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionOptionsUpdate, CredentialSource};
use crate::engine::{Command, Engine};
use crate::error::ClientError;

pub use dashpulse_core::SubscriptionSpec as SubscriptionRequest;

/// Depth of the command queue between handles and the engine.
const COMMAND_CAPACITY: usize = 256;

/// Snapshot returned by [`SyncClient::connection_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub is_connected: bool,
    pub reconnect_attempts: u32,
    /// Subscriptions known to the client.
    pub subscriptions_count: usize,
    /// Subscriptions confirmed by the server.
    pub active_subscriptions_count: usize,
}

/// Handle to a synchronization engine.
///
/// Cheap to clone; every clone talks to the same engine task. The engine
/// stops once the last handle is dropped.
#[derive(Clone)]
pub struct SyncClient {
    commands: mpsc::Sender<Command>,
    store: Arc<SharedStore>,
}

impl SyncClient {
    /// Build a client and spawn its engine on the current runtime.
    ///
    /// Nothing is connected until [`connect`](Self::connect) is called.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
        config: &ClientConfig,
    ) -> Self {
        let writer = StoreWriter::with_capacity(config.notifications.capacity, DEFAULT_EVENT_CAPACITY);
        let store = writer.reader();
        let conn = ConnectionManager::new(
            transport,
            credentials,
            config.connection_options(),
            writer.clone(),
        );
        let buffer = DataBuffer::with_capacity(config.buffer.capacity);
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);

        let engine = Engine::new(
            conn,
            ConflictResolver::new(config.resolver_config()),
            buffer,
            writer,
            rx,
            config.poll_interval(),
        );
        tokio::spawn(engine.run());

        Self {
            commands: tx,
            store,
        }
    }

    /// A client with default configuration.
    #[must_use]
    pub fn with_defaults(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self::new(transport, credentials, &ClientConfig::default())
    }

    /// Establish the connection, waiting until it is ready or has failed.
    ///
    /// Resets the reconnect counter. Succeeds immediately when already
    /// connected.
    ///
    /// # Errors
    ///
    /// [`ClientError::MissingCredential`] without a credential, otherwise the
    /// reason the attempt failed. A failed attempt still leaves automatic
    /// reconnects running when enabled.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.request(Command::Connect).await?
    }

    /// Close the connection, cancel timers and drop every subscription.
    ///
    /// # Errors
    ///
    /// Only if the engine is gone.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.request(Command::Disconnect).await
    }

    /// Register a subscription. Returns as soon as it is recorded; it is sent
    /// now if connected, otherwise on the next connect.
    ///
    /// # Errors
    ///
    /// Only if the engine is gone.
    pub async fn subscribe(&self, request: SubscriptionRequest) -> Result<SubscriptionId, ClientError> {
        self.request(|reply| Command::Subscribe(request, reply)).await
    }

    /// # Errors
    ///
    /// [`ClientError::UnknownSubscription`] for an unknown id.
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), ClientError> {
        let id = id.clone();
        self.request(|reply| Command::Unsubscribe(id, reply)).await?
    }

    /// Replace a subscription's filters. The subscription goes back to
    /// pending and is re-sent under the same id.
    ///
    /// # Errors
    ///
    /// [`ClientError::UnknownSubscription`] for an unknown id.
    pub async fn update_filters(&self, id: &SubscriptionId, filters: FilterSet) -> Result<(), ClientError> {
        let id = id.clone();
        self.request(|reply| Command::UpdateFilters(id, filters, reply))
            .await?
    }

    /// Replace a subscription's data types, like [`update_filters`](Self::update_filters).
    ///
    /// # Errors
    ///
    /// [`ClientError::UnknownSubscription`] for an unknown id.
    pub async fn update_data_types(
        &self,
        id: &SubscriptionId,
        data_types: Vec<String>,
    ) -> Result<(), ClientError> {
        let id = id.clone();
        self.request(|reply| Command::UpdateDataTypes(id, data_types, reply))
            .await?
    }

    /// One-shot fetch outside any subscription.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] when no session is established.
    pub async fn request_immediate_data(
        &self,
        dashboard_type: DashboardType,
        data_types: Vec<String>,
        filters: FilterSet,
    ) -> Result<(), ClientError> {
        self.request(|reply| Command::RequestData {
            dashboard_type,
            data_types,
            filters,
            reply,
        })
        .await?
    }

    /// Current connection and subscription counts.
    #[must_use]
    pub fn connection_status(&self) -> StatusReport {
        let status = self.store.connection_status();
        StatusReport {
            is_connected: status.is_connected,
            reconnect_attempts: status.reconnect_attempts,
            subscriptions_count: self.store.subscription_count(),
            active_subscriptions_count: self.store.active_subscription_count(),
        }
    }

    /// Buffered recent updates for a (dashboard type, filter-set), oldest first.
    ///
    /// # Errors
    ///
    /// Only if the engine is gone.
    pub async fn buffered_data(
        &self,
        dashboard_type: DashboardType,
        filters: &FilterSet,
    ) -> Result<Vec<BufferedEntry>, ClientError> {
        let key = StateKey::new(dashboard_type, filters);
        self.request(|reply| Command::BufferedData(key, reply)).await
    }

    /// Every registered subscription, in creation order.
    ///
    /// # Errors
    ///
    /// Only if the engine is gone.
    pub async fn subscriptions(&self) -> Result<Vec<Subscription>, ClientError> {
        self.request(Command::Subscriptions).await
    }

    /// Change reconnect, timeout or heartbeat settings at runtime.
    ///
    /// # Errors
    ///
    /// Only if the engine is gone.
    pub async fn update_connection_options(
        &self,
        update: ConnectionOptionsUpdate,
    ) -> Result<(), ClientError> {
        self.request(|reply| Command::UpdateOptions(update, reply))
            .await
    }

    /// Read-only view of the state this client has reconciled.
    #[must_use]
    pub fn store(&self) -> &Arc<SharedStore> {
        &self.store
    }

    /// Receive every future store event.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| ClientError::EngineStopped)?;
        rx.await.map_err(|_| ClientError::EngineStopped)
    }
}
