//! Subscription registry.
//!
//! The registry records what the dashboard wants to receive, independent of
//! whether a connection currently exists. It is the source of truth used to
//! re-issue subscriptions after a reconnect.

use crate::model::{now_millis, FilterSet, StateKey};
use dashpulse_protocol::{DashboardType, Frame};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Registry errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No subscription with this id.
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),
}

/// Opaque subscription identifier, generated client-side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Timestamp plus a per-registry sequence number, unique within a session.
    fn generate(seq: u64) -> Self {
        Self(format!("sub_{:x}_{}", now_millis(), seq))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Server-side lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    /// Requested, not yet acknowledged.
    Pending,
    /// Acknowledged by the server.
    Confirmed,
    /// Rejected by the server.
    Error,
}

/// What a caller asks to subscribe to.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSpec {
    pub dashboard_type: DashboardType,
    pub filters: FilterSet,
    pub data_types: Vec<String>,
    pub refresh_interval: Option<Duration>,
}

impl SubscriptionSpec {
    #[must_use]
    pub fn new(dashboard_type: DashboardType, filters: FilterSet, data_types: Vec<String>) -> Self {
        Self {
            dashboard_type,
            filters,
            data_types,
            refresh_interval: None,
        }
    }

    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }
}

/// A registered subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub dashboard_type: DashboardType,
    pub filters: FilterSet,
    /// Requested data types, de-duplicated in first-seen order.
    pub data_types: Vec<String>,
    pub refresh_interval: Option<Duration>,
    pub state: SubscriptionState,
    /// Last error reported by the server.
    pub last_error: Option<String>,
    seq: u64,
}

impl Subscription {
    /// Key of the state this subscription feeds.
    #[must_use]
    pub fn key(&self) -> StateKey {
        StateKey::new(self.dashboard_type, &self.filters)
    }

    /// The `subscribe-to-dashboard` frame announcing this subscription.
    #[must_use]
    pub fn subscribe_frame(&self) -> Frame {
        Frame::subscribe(
            self.id.as_str(),
            self.dashboard_type,
            self.filters.as_value().clone(),
            self.data_types.clone(),
            self.refresh_interval.map(|d| d.as_millis() as u64),
        )
    }

    /// Requested data types that appear in `changed`, in request order.
    #[must_use]
    pub fn intersect(&self, changed: &[String]) -> Vec<String> {
        self.data_types
            .iter()
            .filter(|t| changed.contains(t))
            .cloned()
            .collect()
    }
}

fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// All subscriptions known to one client.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    next_seq: u64,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription as pending and return its id.
    pub fn add(&mut self, spec: SubscriptionSpec) -> SubscriptionId {
        self.next_seq += 1;
        let id = SubscriptionId::generate(self.next_seq);
        let subscription = Subscription {
            id: id.clone(),
            dashboard_type: spec.dashboard_type,
            filters: spec.filters,
            data_types: dedup_tags(spec.data_types),
            refresh_interval: spec.refresh_interval,
            state: SubscriptionState::Pending,
            last_error: None,
            seq: self.next_seq,
        };

        debug!(subscription = %id, dashboard = %subscription.dashboard_type, "Subscription added");
        self.subscriptions.insert(id.clone(), subscription);
        id
    }

    #[must_use]
    pub fn get(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(id)
    }

    /// Delete a subscription.
    pub fn remove(&mut self, id: &SubscriptionId) -> Option<Subscription> {
        let removed = self.subscriptions.remove(id);
        if removed.is_some() {
            debug!(subscription = %id, "Subscription removed");
        }
        removed
    }

    /// Replace the filter-set. The subscription goes back to pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is unknown.
    pub fn update_filters(
        &mut self,
        id: &SubscriptionId,
        filters: FilterSet,
    ) -> Result<&Subscription, RegistryError> {
        let subscription = self.get_mut(id)?;
        subscription.filters = filters;
        subscription.state = SubscriptionState::Pending;
        Ok(subscription)
    }

    /// Replace the requested data types. The subscription goes back to pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is unknown.
    pub fn update_data_types(
        &mut self,
        id: &SubscriptionId,
        data_types: Vec<String>,
    ) -> Result<&Subscription, RegistryError> {
        let subscription = self.get_mut(id)?;
        subscription.data_types = dedup_tags(data_types);
        subscription.state = SubscriptionState::Pending;
        Ok(subscription)
    }

    /// Mark a subscription as acknowledged.
    ///
    /// Returns `false` if the id is unknown, e.g. a late ack for a subscription
    /// that was already removed.
    pub fn confirm(&mut self, id: &SubscriptionId) -> bool {
        match self.subscriptions.get_mut(id) {
            Some(subscription) => {
                subscription.state = SubscriptionState::Confirmed;
                subscription.last_error = None;
                true
            }
            None => false,
        }
    }

    /// Mark a subscription as rejected.
    ///
    /// Returns `false` if the id is unknown.
    pub fn mark_error(&mut self, id: &SubscriptionId, error: impl Into<String>) -> bool {
        match self.subscriptions.get_mut(id) {
            Some(subscription) => {
                subscription.state = SubscriptionState::Error;
                subscription.last_error = Some(error.into());
                true
            }
            None => false,
        }
    }

    /// Reset every subscription to pending and return them in creation order,
    /// ready to be re-sent on a fresh connection.
    pub fn restore(&mut self) -> Vec<Subscription> {
        for subscription in self.subscriptions.values_mut() {
            subscription.state = SubscriptionState::Pending;
        }
        self.iter().cloned().collect()
    }

    /// Subscriptions whose data types intersect `changed`, paired with the
    /// intersection.
    #[must_use]
    pub fn matching(&self, changed: &[String]) -> Vec<(&Subscription, Vec<String>)> {
        self.iter()
            .filter_map(|s| {
                let hit = s.intersect(changed);
                (!hit.is_empty()).then_some((s, hit))
            })
            .collect()
    }

    /// Drop every subscription, returning their ids.
    pub fn clear(&mut self) -> Vec<SubscriptionId> {
        let ids = self.iter().map(|s| s.id.clone()).collect();
        self.subscriptions.clear();
        ids
    }

    /// Subscriptions in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        let mut all: Vec<&Subscription> = self.subscriptions.values().collect();
        all.sort_by_key(|s| s.seq);
        all.into_iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Number of confirmed subscriptions.
    #[must_use]
    pub fn confirmed_count(&self) -> usize {
        self.subscriptions
            .values()
            .filter(|s| s.state == SubscriptionState::Confirmed)
            .count()
    }

    fn get_mut(&mut self, id: &SubscriptionId) -> Result<&mut Subscription, RegistryError> {
        self.subscriptions
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownSubscription(id.clone()))
    }
}
