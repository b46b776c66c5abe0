//! Shared, read-mostly store consumed by the UI.
//!
//! [`SharedStore`] is the read side. Its contents can only be changed through
//! a [`StoreWriter`], which the synchronization engine keeps to itself. The
//! store mirrors state the engine owns; it is never read back as the source
//! of truth. Readers either query the store directly or subscribe to
//! [`StoreEvent`]s. Events are fanned out over a
//! broadcast channel, so every receiver sees every event in publish order and
//! adding or dropping a receiver never disturbs a delivery already under way.

use crate::buffer::BufferedEntry;
use crate::model::{ConnectionStatus, ReconciledState, StateKey};
use crate::notification::{Notification, NotificationLog, DEFAULT_NOTIFICATION_CAPACITY};
use crate::registry::{SubscriptionId, SubscriptionState};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::trace;

/// Default broadcast capacity for store events.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// A change published by the store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// Reconciled state for a key changed.
    StateChanged {
        key: StateKey,
        state: ReconciledState,
    },
    /// A subscription changed state; `None` means it was torn down.
    SubscriptionChanged {
        id: SubscriptionId,
        state: Option<SubscriptionState>,
    },
    /// A notification was appended.
    Notification(Notification),
    /// Transport health changed.
    ConnectionChanged(ConnectionStatus),
    /// Entries buffered before a reconnect, replayed once the session is back.
    Replay {
        key: StateKey,
        entries: Vec<BufferedEntry>,
    },
}

/// Read side of the store, handed to UI consumers.
#[derive(Debug)]
pub struct SharedStore {
    states: DashMap<StateKey, ReconciledState>,
    subscriptions: DashMap<SubscriptionId, SubscriptionState>,
    buffered: DashMap<StateKey, usize>,
    notifications: Mutex<NotificationLog>,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<StoreEvent>,
}

impl SharedStore {
    fn with_capacity(notification_capacity: usize, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            states: DashMap::new(),
            subscriptions: DashMap::new(),
            buffered: DashMap::new(),
            notifications: Mutex::new(NotificationLog::with_capacity(notification_capacity)),
            status,
            events,
        }
    }

    /// Receive every future store event.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Watch connection status changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    // Readers

    #[must_use]
    pub fn state(&self, key: &StateKey) -> Option<ReconciledState> {
        self.states.get(key).map(|s| s.value().clone())
    }

    #[must_use]
    pub fn subscription_state(&self, id: &SubscriptionId) -> Option<SubscriptionState> {
        self.subscriptions.get(id).map(|s| *s.value())
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn active_subscription_count(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|s| *s.value() == SubscriptionState::Confirmed)
            .count()
    }

    /// Buffered entries for a key as of the last poll.
    #[must_use]
    pub fn buffered_count(&self, key: &StateKey) -> usize {
        self.buffered.get(key).map_or(0, |c| *c.value())
    }

    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.log().entries()
    }

    #[must_use]
    pub fn unread_notifications(&self) -> usize {
        self.log().unread_count()
    }

    /// Flag a notification as read. Returns `false` if it is no longer held.
    pub fn mark_notification_read(&self, id: u64) -> bool {
        self.log().mark_read(id)
    }

    pub fn mark_all_notifications_read(&self) {
        self.log().mark_all_read();
    }

    // Writers, reachable only through `StoreWriter`.

    fn publish_state(&self, key: StateKey, state: ReconciledState) {
        self.states.insert(key.clone(), state.clone());
        self.emit(StoreEvent::StateChanged { key, state });
    }

    fn set_subscription(&self, id: SubscriptionId, state: Option<SubscriptionState>) {
        match state {
            Some(s) => {
                self.subscriptions.insert(id.clone(), s);
            }
            None => {
                self.subscriptions.remove(&id);
            }
        }
        self.emit(StoreEvent::SubscriptionChanged { id, state });
    }

    fn set_buffered_counts(&self, counts: Vec<(StateKey, usize)>) {
        self.buffered.clear();
        for (key, count) in counts {
            self.buffered.insert(key, count);
        }
    }

    fn push_notification(&self, notification: Notification) -> Notification {
        let stored = self.log().push(notification);
        self.emit(StoreEvent::Notification(stored.clone()));
        stored
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status.clone());
        self.emit(StoreEvent::ConnectionChanged(status));
    }

    fn publish_replay(&self, key: StateKey, entries: Vec<BufferedEntry>) {
        self.emit(StoreEvent::Replay { key, entries });
    }

    fn emit(&self, event: StoreEvent) {
        // No receivers is fine; the snapshot above is the durable copy.
        let receivers = self.events.send(event).unwrap_or_default();
        trace!(receivers, "Store event published");
    }

    fn log(&self) -> MutexGuard<'_, NotificationLog> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write side of a [`SharedStore`].
///
/// Owned by the synchronization engine. Cloning it shares the same store.
#[derive(Debug, Clone)]
pub struct StoreWriter {
    store: Arc<SharedStore>,
}

impl StoreWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_NOTIFICATION_CAPACITY, DEFAULT_EVENT_CAPACITY)
    }

    /// Create a store with explicit notification and event capacities.
    #[must_use]
    pub fn with_capacity(notification_capacity: usize, event_capacity: usize) -> Self {
        Self {
            store: Arc::new(SharedStore::with_capacity(notification_capacity, event_capacity)),
        }
    }

    /// A read-only handle for UI consumers.
    #[must_use]
    pub fn reader(&self) -> Arc<SharedStore> {
        Arc::clone(&self.store)
    }

    /// Mirror the reconciled state for a key.
    pub fn publish_state(&self, key: StateKey, state: ReconciledState) {
        self.store.publish_state(key, state);
    }

    /// Mirror a subscription state; `None` removes it.
    pub fn set_subscription(&self, id: SubscriptionId, state: Option<SubscriptionState>) {
        self.store.set_subscription(id, state);
    }

    /// Replace the buffered-count snapshot.
    pub fn set_buffered_counts(&self, counts: Vec<(StateKey, usize)>) {
        self.store.set_buffered_counts(counts);
    }

    /// Append a notification and announce it.
    pub fn push_notification(&self, notification: Notification) -> Notification {
        self.store.push_notification(notification)
    }

    /// Replace the connection status and announce it.
    pub fn set_status(&self, status: ConnectionStatus) {
        self.store.set_status(status);
    }

    /// Announce replayed buffer entries.
    pub fn publish_replay(&self, key: StateKey, entries: Vec<BufferedEntry>) {
        self.store.publish_replay(key, entries);
    }
}

impl Default for StoreWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FilterSet;
    use dashpulse_protocol::{DashboardType, NotificationKind, Priority};
    use serde_json::json;

    fn key() -> StateKey {
        StateKey::new(DashboardType::Executive, &FilterSet::empty())
    }

    #[tokio::test]
    async fn test_state_changes_reach_every_receiver_in_order() {
        let writer = StoreWriter::new();
        let store = writer.reader();
        let mut first = store.subscribe();
        let mut second = store.subscribe();

        for ts in [1, 2] {
            let mut state = ReconciledState::default();
            state.data.insert("x".into(), json!(ts));
            state.timestamp = ts;
            writer.publish_state(key(), state);
        }

        for rx in [&mut first, &mut second] {
            for expected in [1, 2] {
                match rx.recv().await.unwrap() {
                    StoreEvent::StateChanged { state, .. } => assert_eq!(state.timestamp, expected),
                    other => panic!("Expected StateChanged, got {:?}", other),
                }
            }
        }
        assert_eq!(store.state(&key()).unwrap().timestamp, 2);
    }

    #[tokio::test]
    async fn test_late_receiver_sees_only_new_events() {
        let writer = StoreWriter::new();
        let store = writer.reader();
        writer.publish_state(key(), ReconciledState::default());

        let mut late = store.subscribe();
        writer.set_subscription(SubscriptionId::from("sub-1"), Some(SubscriptionState::Pending));

        match late.recv().await.unwrap() {
            StoreEvent::SubscriptionChanged { id, .. } => assert_eq!(id.as_str(), "sub-1"),
            other => panic!("Expected SubscriptionChanged, got {:?}", other),
        }
    }

    #[test]
    fn test_subscription_counts() {
        let writer = StoreWriter::new();
        let store = writer.reader();
        writer.set_subscription("a".into(), Some(SubscriptionState::Pending));
        writer.set_subscription("b".into(), Some(SubscriptionState::Confirmed));
        assert_eq!(store.subscription_count(), 2);
        assert_eq!(store.active_subscription_count(), 1);

        writer.set_subscription("b".into(), None);
        assert_eq!(store.subscription_count(), 1);
        assert_eq!(store.active_subscription_count(), 0);
    }

    #[test]
    fn test_status_watch() {
        let writer = StoreWriter::new();
        let store = writer.reader();
        let rx = store.watch_status();

        writer.set_status(ConnectionStatus {
            is_connected: true,
            last_connected: Some(10),
            error: None,
            reconnect_attempts: 0,
        });

        assert!(rx.borrow().is_connected);
        assert!(store.connection_status().is_connected);
    }

    #[test]
    fn test_notifications_are_capped_and_markable() {
        let writer = StoreWriter::with_capacity(3, 16);
        let store = writer.reader();
        for i in 0..5 {
            writer.push_notification(Notification::new(
                NotificationKind::Alert,
                Priority::Medium,
                format!("n{i}"),
            ));
        }

        let held = store.notifications();
        assert_eq!(held.len(), 3);
        assert!(store.mark_notification_read(held[0].id));
        assert_eq!(store.unread_notifications(), 2);
    }

    #[test]
    fn test_buffered_counts_snapshot() {
        let writer = StoreWriter::new();
        let store = writer.reader();
        writer.set_buffered_counts(vec![(key(), 4)]);
        assert_eq!(store.buffered_count(&key()), 4);

        writer.set_buffered_counts(Vec::new());
        assert_eq!(store.buffered_count(&key()), 0);
    }
}
