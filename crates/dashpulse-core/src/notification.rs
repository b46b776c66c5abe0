//! Notifications surfaced to the dashboard.

use crate::model::{now_millis, Timestamp};
use dashpulse_protocol::{DashboardType, NotificationKind, NotificationPayload, Priority};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;

/// Default number of notifications retained.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 100;

/// A notification entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Assigned by the log on insertion.
    pub id: u64,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub dashboard_type: Option<DashboardType>,
    pub data: Option<Value>,
    pub timestamp: Timestamp,
    pub read: bool,
}

impl Notification {
    /// Create a locally raised notification, stamped with the current time.
    #[must_use]
    pub fn new(kind: NotificationKind, priority: Priority, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            kind,
            priority,
            title: String::new(),
            message: message.into(),
            dashboard_type: None,
            data: None,
            timestamp: now_millis(),
            read: false,
        }
    }

    /// Build from a server notification frame.
    #[must_use]
    pub fn from_payload(payload: NotificationPayload) -> Self {
        Self {
            id: 0,
            kind: payload.kind,
            priority: payload.priority,
            title: payload.title,
            message: payload.message,
            dashboard_type: payload.dashboard_type,
            data: payload.data,
            timestamp: payload.timestamp,
            read: false,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn with_dashboard(mut self, dashboard_type: DashboardType) -> Self {
        self.dashboard_type = Some(dashboard_type);
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Ordered notification list, oldest first, dropping the oldest past capacity.
#[derive(Debug)]
pub struct NotificationLog {
    entries: VecDeque<Notification>,
    capacity: usize,
    next_id: u64,
}

impl NotificationLog {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_NOTIFICATION_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            next_id: 0,
        }
    }

    /// Append a notification, assigning its id. Returns the stored entry.
    pub fn push(&mut self, mut notification: Notification) -> Notification {
        self.next_id += 1;
        notification.id = self.next_id;
        self.entries.push_back(notification.clone());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        notification
    }

    /// Mark one entry as read. Returns `false` if it is no longer held.
    pub fn mark_read(&mut self, id: u64) -> bool {
        match self.entries.iter_mut().find(|n| n.id == id) {
            Some(entry) => {
                entry.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        for entry in &mut self.entries {
            entry.read = true;
        }
    }

    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|n| !n.read).count()
    }

    /// Copy of all entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<Notification> {
        self.entries.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::new()
    }
}
