//! The synchronization engine.
//!
//! A single task owns all mutable client state. It processes inbound frames,
//! caller commands and timers one at a time, so no state is ever shared
//! between writers. Frames are polled before commands: a command issued after
//! a frame arrived observes that frame's effects.

use dashpulse_core::{
    BufferedEntry, ConflictResolver, DataBuffer, DataUpdate, FilterSet, Notification,
    ReconciledState, StateKey, StoreWriter, Subscription, SubscriptionId, SubscriptionRegistry,
    SubscriptionSpec, SubscriptionState,
};
use std::collections::HashMap;
use dashpulse_protocol::{DashboardType, Frame, NotificationKind, Priority};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionOptionsUpdate};
use crate::error::ClientError;
use crate::metrics;

type Reply<T> = oneshot::Sender<T>;

/// Requests sent from [`SyncClient`](crate::SyncClient) handles.
pub(crate) enum Command {
    Connect(Reply<Result<(), ClientError>>),
    Disconnect(Reply<()>),
    Subscribe(SubscriptionSpec, Reply<SubscriptionId>),
    Unsubscribe(SubscriptionId, Reply<Result<(), ClientError>>),
    UpdateFilters(SubscriptionId, FilterSet, Reply<Result<(), ClientError>>),
    UpdateDataTypes(SubscriptionId, Vec<String>, Reply<Result<(), ClientError>>),
    RequestData {
        dashboard_type: DashboardType,
        data_types: Vec<String>,
        filters: FilterSet,
        reply: Reply<Result<(), ClientError>>,
    },
    BufferedData(StateKey, Reply<Vec<BufferedEntry>>),
    Subscriptions(Reply<Vec<Subscription>>),
    UpdateOptions(ConnectionOptionsUpdate, Reply<()>),
}

pub(crate) struct Engine {
    conn: ConnectionManager,
    registry: SubscriptionRegistry,
    resolver: ConflictResolver,
    /// Reconciled state per key. The store only mirrors it.
    states: HashMap<StateKey, ReconciledState>,
    buffer: DataBuffer,
    store: StoreWriter,
    commands: mpsc::Receiver<Command>,
    poll: Interval,
    connect_waiters: Vec<Reply<Result<(), ClientError>>>,
}

impl Engine {
    pub(crate) fn new(
        conn: ConnectionManager,
        resolver: ConflictResolver,
        buffer: DataBuffer,
        store: StoreWriter,
        commands: mpsc::Receiver<Command>,
        poll_interval: Duration,
    ) -> Self {
        let period = poll_interval.max(Duration::from_millis(1));
        let mut poll = interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            conn,
            registry: SubscriptionRegistry::new(),
            resolver,
            states: HashMap::new(),
            buffer,
            store,
            commands,
            poll,
            connect_waiters: Vec::new(),
        }
    }

    /// Run until every client handle is dropped.
    pub(crate) async fn run(mut self) {
        debug!("Synchronization engine started");

        loop {
            tokio::select! {
                biased;

                event = self.conn.next_event() => self.on_connection_event(event).await,

                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },

                _ = self.poll.tick() => {
                    self.store.set_buffered_counts(self.buffer.counts());
                    trace!(buffered = self.buffer.total(), "Buffered counts refreshed");
                }
            }
        }

        self.conn.disconnect().await;
        debug!("Synchronization engine stopped");
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Attempt(Ok(())) => {
                self.on_connected().await;
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            ConnectionEvent::Attempt(Err(e)) => {
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Err(e.clone()));
                }
            }
            ConnectionEvent::Frame(frame) => self.on_frame(frame).await,
            ConnectionEvent::Lost(reason) => self.conn.mark_lost(&reason),
            ConnectionEvent::ReconnectDue => self.conn.reconnect_now(),
            ConnectionEvent::HeartbeatDue => {
                let _ = self.conn.send(Frame::ping(dashpulse_core::now_millis())).await;
            }
        }
    }

    /// Re-issue every known subscription, then replay and clear the buffer.
    async fn on_connected(&mut self) {
        let restored = self.registry.restore();
        info!(subscriptions = restored.len(), "Restoring subscriptions");

        for subscription in &restored {
            self.store
                .set_subscription(subscription.id.clone(), Some(SubscriptionState::Pending));
        }
        for subscription in restored {
            if self.conn.send(subscription.subscribe_frame()).await.is_err() {
                break;
            }
        }
        self.refresh_subscription_gauge();

        for (key, entries) in self.buffer.drain() {
            debug!(key = %key, entries = entries.len(), "Replaying buffered updates");
            self.store.publish_replay(key, entries);
        }
        self.store.set_buffered_counts(Vec::new());
    }

    async fn on_frame(&mut self, frame: Frame) {
        trace!(frame = frame.name(), "Frame received");

        match frame {
            Frame::Ping { timestamp } => {
                let _ = self.conn.send(Frame::pong(timestamp)).await;
            }
            Frame::Pong { .. } => {}

            Frame::SubscriptionConfirmed {
                subscription_id, ..
            } => {
                let id = SubscriptionId::from(subscription_id);
                if self.registry.confirm(&id) {
                    debug!(subscription = %id, "Subscription confirmed");
                    self.store
                        .set_subscription(id, Some(SubscriptionState::Confirmed));
                    self.refresh_subscription_gauge();
                } else {
                    debug!(subscription = %id, "Dropping confirmation for unknown subscription");
                }
            }

            Frame::SubscriptionError {
                error,
                subscription_id,
                details,
            } => {
                warn!(subscription = ?subscription_id, error = %error, "Subscription error");
                if let Some(id) = subscription_id.map(SubscriptionId::from) {
                    if self.registry.mark_error(&id, error.clone()) {
                        self.store.set_subscription(id, Some(SubscriptionState::Error));
                        self.refresh_subscription_gauge();
                    }
                }
                let mut notification =
                    Notification::new(NotificationKind::Alert, Priority::High, error)
                        .with_title("Subscription error");
                if let Some(details) = details {
                    notification = notification.with_data(details);
                }
                self.store.push_notification(notification);
            }

            frame @ (Frame::DashboardData { .. } | Frame::DashboardUpdate { .. }) => {
                if let Ok(update) = DataUpdate::from_frame(frame) {
                    self.apply_update(update);
                }
            }

            Frame::DashboardDataChanged {
                change_type,
                affected_data_types,
                change_count,
                ..
            } => {
                debug!(
                    change_type = %change_type,
                    changes = change_count,
                    affected = ?affected_data_types,
                    "Dashboard data changed"
                );
                self.refetch(&affected_data_types).await;
            }

            Frame::DashboardNotification(payload) => {
                self.store.push_notification(Notification::from_payload(payload));
            }
            Frame::DashboardCriticalNotification(payload) => {
                let mut notification = Notification::from_payload(payload);
                notification.priority = Priority::Critical;
                warn!(message = %notification.message, "Critical dashboard notification");
                self.store.push_notification(notification);
            }

            Frame::DashboardError { error, details } => {
                warn!(error = %error, "Dashboard error");
                self.push_error("Dashboard error", error, details);
            }
            Frame::DataRequestError { error, details } => {
                warn!(error = %error, "Data request error");
                self.push_error("Data request error", error, details);
            }

            other => {
                warn!(frame = other.name(), "Unexpected frame from server");
            }
        }
    }

    fn apply_update(&mut self, update: DataUpdate) {
        let key = update.key();
        let resolution = self.resolver.resolve(&update, self.states.get(&key));

        for conflict in &resolution.conflicts {
            debug!(key = %key, conflict = %conflict, "Conflict detected");
            metrics::record_conflict(conflict.kind());
        }
        metrics::record_updates(
            resolution.applied.len(),
            resolution.merged.len(),
            resolution.discarded.len(),
        );

        if resolution.changed() {
            self.buffer.append(key.clone(), &update);
            trace!(
                key = %key,
                timestamp = resolution.state.timestamp,
                initial = update.is_initial,
                "State updated"
            );
            self.states.insert(key.clone(), resolution.state.clone());
            self.store.publish_state(key, resolution.state);
        } else {
            debug!(key = %key, timestamp = update.timestamp, "Stale update discarded");
        }
    }

    /// Ask for fresh data for every subscription touched by a change signal.
    async fn refetch(&mut self, changed: &[String]) {
        let requests: Vec<Frame> = self
            .registry
            .matching(changed)
            .into_iter()
            .map(|(subscription, data_types)| {
                Frame::request_data(
                    subscription.dashboard_type,
                    data_types,
                    subscription.filters.as_value().clone(),
                )
            })
            .collect();

        for request in requests {
            if self.conn.send(request).await.is_err() {
                break;
            }
        }
    }

    fn push_error(&self, title: &str, error: String, details: Option<serde_json::Value>) {
        let mut notification =
            Notification::new(NotificationKind::Alert, Priority::Medium, error).with_title(title);
        if let Some(details) = details {
            notification = notification.with_data(details);
        }
        self.store.push_notification(notification);
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                if self.conn.is_connected() {
                    let _ = reply.send(Ok(()));
                    return;
                }
                match self.conn.connect() {
                    Ok(()) => self.connect_waiters.push(reply),
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }

            Command::Disconnect(reply) => {
                self.conn.disconnect().await;
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Err(ClientError::Disconnected));
                }
                for id in self.registry.clear() {
                    self.store.set_subscription(id, None);
                }
                self.refresh_subscription_gauge();
                let _ = reply.send(());
            }

            Command::Subscribe(spec, reply) => {
                let id = self.registry.add(spec);
                self.store
                    .set_subscription(id.clone(), Some(SubscriptionState::Pending));
                if let Some(frame) = self.registry.get(&id).map(Subscription::subscribe_frame) {
                    self.send_if_connected(frame).await;
                }
                let _ = reply.send(id);
            }

            Command::Unsubscribe(id, reply) => {
                let result = match self.registry.remove(&id) {
                    Some(_) => {
                        self.store.set_subscription(id.clone(), None);
                        self.refresh_subscription_gauge();
                        self.send_if_connected(Frame::unsubscribe(id.as_str())).await;
                        Ok(())
                    }
                    None => Err(ClientError::UnknownSubscription(id)),
                };
                let _ = reply.send(result);
            }

            Command::UpdateFilters(id, filters, reply) => {
                let frame = self
                    .registry
                    .update_filters(&id, filters)
                    .map(Subscription::subscribe_frame);
                let result = self.resubscribe(id, frame.map_err(Into::into)).await;
                let _ = reply.send(result);
            }

            Command::UpdateDataTypes(id, data_types, reply) => {
                let frame = self
                    .registry
                    .update_data_types(&id, data_types)
                    .map(Subscription::subscribe_frame);
                let result = self.resubscribe(id, frame.map_err(Into::into)).await;
                let _ = reply.send(result);
            }

            Command::RequestData {
                dashboard_type,
                data_types,
                filters,
                reply,
            } => {
                let result = if self.conn.is_connected() {
                    self.conn
                        .send(Frame::request_data(
                            dashboard_type,
                            data_types,
                            filters.into_value(),
                        ))
                        .await
                } else {
                    Err(ClientError::NotConnected)
                };
                let _ = reply.send(result);
            }

            Command::BufferedData(key, reply) => {
                let _ = reply.send(self.buffer.get(&key));
            }

            Command::Subscriptions(reply) => {
                let _ = reply.send(self.registry.iter().cloned().collect());
            }

            Command::UpdateOptions(update, reply) => {
                self.conn.update_options(&update);
                let _ = reply.send(());
            }
        }
    }

    /// Mirror a subscription that went back to pending and re-send it.
    async fn resubscribe(
        &mut self,
        id: SubscriptionId,
        frame: Result<Frame, ClientError>,
    ) -> Result<(), ClientError> {
        let frame = frame?;
        self.store
            .set_subscription(id, Some(SubscriptionState::Pending));
        self.refresh_subscription_gauge();
        self.send_if_connected(frame).await;
        Ok(())
    }

    /// Send when connected. Otherwise the registry re-issues it on connect.
    async fn send_if_connected(&mut self, frame: Frame) {
        if self.conn.is_connected() {
            let _ = self.conn.send(frame).await;
        }
    }

    fn refresh_subscription_gauge(&self) {
        metrics::set_active_subscriptions(self.registry.confirmed_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionOptions, StaticCredential};
    use dashpulse_protocol::DataMap;
    use dashpulse_transport::MemoryTransport;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn engine() -> (Engine, StoreWriter) {
        let (transport, _listener) = MemoryTransport::pair();
        let writer = StoreWriter::new();
        let conn = ConnectionManager::new(
            Arc::new(transport),
            Arc::new(StaticCredential::new("t")),
            ConnectionOptions::default(),
            writer.clone(),
        );
        let (_tx, rx) = mpsc::channel(1);
        let engine = Engine::new(
            conn,
            ConflictResolver::default(),
            DataBuffer::new(),
            writer.clone(),
            rx,
            Duration::from_secs(5),
        );
        (engine, writer)
    }

    fn update(x: Value, timestamp: u64) -> DataUpdate {
        let mut data = DataMap::new();
        data.insert("x".into(), x);
        DataUpdate::new(DashboardType::Executive, FilterSet::empty(), data, timestamp)
    }

    #[tokio::test]
    async fn test_resolution_ignores_mirror_contents() {
        let (mut engine, writer) = engine();
        let key = StateKey::new(DashboardType::Executive, &FilterSet::empty());

        engine.apply_update(update(json!([1, 2, 3]), 100));
        // Clobber the mirror; the engine must keep resolving against its own copy.
        writer.publish_state(key.clone(), ReconciledState::default());
        engine.apply_update(update(json!([9]), 50));

        let held = &engine.states[&key];
        assert_eq!(held.data["x"], json!([1, 2, 3]));
        assert_eq!(held.timestamp, 100);
        assert_ne!(writer.reader().state(&key).map(|s| s.timestamp), Some(50));
        assert_eq!(engine.buffer.len(&key), 1);
    }

    #[tokio::test]
    async fn test_accepted_update_is_mirrored() {
        let (mut engine, writer) = engine();
        let key = StateKey::new(DashboardType::Executive, &FilterSet::empty());

        engine.apply_update(update(json!({"a": 1}), 10));
        engine.apply_update(update(json!({"b": 2}), 20));

        let mirrored = writer.reader().state(&key).unwrap();
        assert_eq!(mirrored, engine.states[&key]);
        assert_eq!(mirrored.data["x"], json!({"a": 1, "b": 2}));
        assert_eq!(mirrored.timestamp, 20);
    }
}
