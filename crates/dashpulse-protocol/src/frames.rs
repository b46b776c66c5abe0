//! Frame types for the dashpulse protocol.
//!
//! Frames are the messages exchanged between a dashboard client and its backend.
//! Every frame is a map tagged by its `type` field; payload fields use camelCase
//! on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Named dashboard view a subscription targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DashboardType {
    Executive,
    Operational,
    Financial,
    Custom,
}

impl DashboardType {
    /// Wire name of the dashboard type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DashboardType::Executive => "executive",
            DashboardType::Operational => "operational",
            DashboardType::Financial => "financial",
            DashboardType::Custom => "custom",
        }
    }
}

impl fmt::Display for DashboardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DashboardType {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executive" => Ok(DashboardType::Executive),
            "operational" => Ok(DashboardType::Operational),
            "financial" => Ok(DashboardType::Financial),
            "custom" => Ok(DashboardType::Custom),
            _ => Err("Invalid dashboard type"),
        }
    }
}

/// Kind of a pushed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DataUpdate,
    Alert,
    ThresholdBreach,
    AnomalyDetected,
}

/// Notification priority, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// Data-type tag to opaque value mapping carried by data pushes.
pub type DataMap = BTreeMap<String, Value>;

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Initial handshake carrying the bearer credential.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version spoken by the client.
        version: u8,
        /// Bearer token from the session manager.
        token: String,
    },

    /// Handshake accepted.
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected {
        /// Server-assigned connection identifier.
        connection_id: String,
        /// Protocol version spoken by the server.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Open (or replace) a dashboard subscription.
    #[serde(rename = "subscribe-to-dashboard", rename_all = "camelCase")]
    SubscribeToDashboard {
        subscription_id: String,
        dashboard_type: DashboardType,
        filters: Value,
        data_types: Vec<String>,
        /// Requested refresh cadence in milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_interval: Option<u64>,
    },

    /// Cancel a dashboard subscription.
    #[serde(rename = "unsubscribe-from-dashboard", rename_all = "camelCase")]
    UnsubscribeFromDashboard { subscription_id: String },

    /// Replace the filters of an existing subscription.
    #[serde(rename = "update-dashboard-filters", rename_all = "camelCase")]
    UpdateDashboardFilters {
        subscription_id: String,
        filters: Value,
    },

    /// One-shot data fetch, independent of any subscription.
    #[serde(rename = "request-dashboard-data", rename_all = "camelCase")]
    RequestDashboardData {
        dashboard_type: DashboardType,
        data_types: Vec<String>,
        filters: Value,
    },

    /// Server acknowledged a subscription.
    #[serde(rename = "subscription-confirmed", rename_all = "camelCase")]
    SubscriptionConfirmed {
        subscription_id: String,
        dashboard_type: DashboardType,
        data_types: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_interval: Option<u64>,
    },

    /// Server rejected a subscribe or filter update.
    #[serde(rename = "subscription-error", rename_all = "camelCase")]
    SubscriptionError {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subscription_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },

    /// Data push (initial snapshot or response to a request).
    #[serde(rename = "dashboard-data", rename_all = "camelCase")]
    DashboardData {
        dashboard_type: DashboardType,
        data: DataMap,
        timestamp: u64,
        filters: Value,
        #[serde(default)]
        is_initial: bool,
    },

    /// Incremental data push. Same shape as `DashboardData`.
    #[serde(rename = "dashboard-update", rename_all = "camelCase")]
    DashboardUpdate {
        dashboard_type: DashboardType,
        data: DataMap,
        timestamp: u64,
        filters: Value,
        #[serde(default)]
        is_initial: bool,
    },

    /// Fleet-wide change signal without payload.
    #[serde(rename = "dashboard-data-changed", rename_all = "camelCase")]
    DashboardDataChanged {
        change_type: String,
        affected_data_types: Vec<String>,
        timestamp: u64,
        change_count: u32,
    },

    /// Regular notification.
    #[serde(rename = "dashboard-notification")]
    DashboardNotification(NotificationPayload),

    /// Critical notification.
    #[serde(rename = "dashboard-critical-notification")]
    DashboardCriticalNotification(NotificationPayload),

    /// Generic server-side failure.
    #[serde(rename = "dashboard-error")]
    DashboardError {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },

    /// A one-shot data request failed.
    #[serde(rename = "data-request-error")]
    DataRequestError {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

/// Body shared by both notification frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub kind: NotificationKind,
    #[serde(default)]
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_type: Option<DashboardType>,
    pub timestamp: u64,
}

impl Frame {
    /// Wire name of the frame, as found in its `type` field.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Connect { .. } => "connect",
            Frame::Connected { .. } => "connected",
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
            Frame::SubscribeToDashboard { .. } => "subscribe-to-dashboard",
            Frame::UnsubscribeFromDashboard { .. } => "unsubscribe-from-dashboard",
            Frame::UpdateDashboardFilters { .. } => "update-dashboard-filters",
            Frame::RequestDashboardData { .. } => "request-dashboard-data",
            Frame::SubscriptionConfirmed { .. } => "subscription-confirmed",
            Frame::SubscriptionError { .. } => "subscription-error",
            Frame::DashboardData { .. } => "dashboard-data",
            Frame::DashboardUpdate { .. } => "dashboard-update",
            Frame::DashboardDataChanged { .. } => "dashboard-data-changed",
            Frame::DashboardNotification(_) => "dashboard-notification",
            Frame::DashboardCriticalNotification(_) => "dashboard-critical-notification",
            Frame::DashboardError { .. } => "dashboard-error",
            Frame::DataRequestError { .. } => "data-request-error",
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(version: u8, token: impl Into<String>) -> Self {
        Frame::Connect {
            version,
            token: token.into(),
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }

    /// Create a new Ping frame with timestamp.
    #[must_use]
    pub fn ping(timestamp: u64) -> Self {
        Frame::Ping {
            timestamp: Some(timestamp),
        }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new SubscribeToDashboard frame.
    #[must_use]
    pub fn subscribe(
        subscription_id: impl Into<String>,
        dashboard_type: DashboardType,
        filters: Value,
        data_types: Vec<String>,
        refresh_interval: Option<u64>,
    ) -> Self {
        Frame::SubscribeToDashboard {
            subscription_id: subscription_id.into(),
            dashboard_type,
            filters,
            data_types,
            refresh_interval,
        }
    }

    /// Create a new UnsubscribeFromDashboard frame.
    #[must_use]
    pub fn unsubscribe(subscription_id: impl Into<String>) -> Self {
        Frame::UnsubscribeFromDashboard {
            subscription_id: subscription_id.into(),
        }
    }

    /// Create a new RequestDashboardData frame.
    #[must_use]
    pub fn request_data(dashboard_type: DashboardType, data_types: Vec<String>, filters: Value) -> Self {
        Frame::RequestDashboardData {
            dashboard_type,
            data_types,
            filters,
        }
    }

    /// Create a new SubscriptionConfirmed frame.
    #[must_use]
    pub fn confirmed(
        subscription_id: impl Into<String>,
        dashboard_type: DashboardType,
        data_types: Vec<String>,
    ) -> Self {
        Frame::SubscriptionConfirmed {
            subscription_id: subscription_id.into(),
            dashboard_type,
            data_types,
            refresh_interval: None,
        }
    }

    /// Create a new DashboardUpdate frame.
    #[must_use]
    pub fn update(dashboard_type: DashboardType, data: DataMap, timestamp: u64, filters: Value) -> Self {
        Frame::DashboardUpdate {
            dashboard_type,
            data,
            timestamp,
            filters,
            is_initial: false,
        }
    }
}
