//! Data model shared by every dashpulse component.
//!
//! Updates are addressed by a [`StateKey`]: the dashboard type plus the
//! canonical encoding of the filter-set the data was computed against.

use dashpulse_protocol::{DashboardType, DataMap, Frame};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Current wall-clock time in milliseconds.
#[must_use]
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Opaque query criteria narrowing a dashboard's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet(Value);

impl FilterSet {
    /// Wrap a structured filter value.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// A filter-set with no criteria.
    #[must_use]
    pub fn empty() -> Self {
        Self(Value::Object(serde_json::Map::new()))
    }

    /// Borrow the underlying value.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume into the underlying value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Canonical encoding: object keys are sorted, so structurally equal
    /// filter-sets yield the same key.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for FilterSet {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Address of one reconciled state / buffer queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StateKey {
    pub dashboard_type: DashboardType,
    pub filters: String,
}

impl StateKey {
    #[must_use]
    pub fn new(dashboard_type: DashboardType, filters: &FilterSet) -> Self {
        Self {
            dashboard_type,
            filters: filters.canonical_key(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dashboard_type, self.filters)
    }
}

/// A data push as received from the server. Never mutated after receipt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataUpdate {
    pub dashboard_type: DashboardType,
    pub data: DataMap,
    pub timestamp: Timestamp,
    pub filters: FilterSet,
    pub is_initial: bool,
}

impl DataUpdate {
    /// Create a non-initial update.
    #[must_use]
    pub fn new(
        dashboard_type: DashboardType,
        filters: FilterSet,
        data: DataMap,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            dashboard_type,
            data,
            timestamp,
            filters,
            is_initial: false,
        }
    }

    /// Key of the state this update targets.
    #[must_use]
    pub fn key(&self) -> StateKey {
        StateKey::new(self.dashboard_type, &self.filters)
    }

    /// Extract an update from a `dashboard-data` or `dashboard-update` frame.
    ///
    /// Any other frame is handed back unchanged.
    pub fn from_frame(frame: Frame) -> Result<Self, Frame> {
        match frame {
            Frame::DashboardData {
                dashboard_type,
                data,
                timestamp,
                filters,
                is_initial,
            }
            | Frame::DashboardUpdate {
                dashboard_type,
                data,
                timestamp,
                filters,
                is_initial,
            } => Ok(Self {
                dashboard_type,
                data,
                timestamp,
                filters: FilterSet::new(filters),
                is_initial,
            }),
            other => Err(other),
        }
    }
}

/// Currently accepted values for one [`StateKey`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciledState {
    /// Accepted value per data-type tag.
    pub data: DataMap,
    /// Newest timestamp of any accepted update. Never decreases.
    pub timestamp: Timestamp,
    /// Timestamp of the update that last set each data type.
    pub field_timestamps: BTreeMap<String, Timestamp>,
}

impl ReconciledState {
    /// Held value for a data type.
    #[must_use]
    pub fn value(&self, data_type: &str) -> Option<&Value> {
        self.data.get(data_type)
    }

    /// Timestamp at which a data type was last accepted.
    #[must_use]
    pub fn held_timestamp(&self, data_type: &str) -> Option<Timestamp> {
        self.field_timestamps.get(data_type).copied()
    }
}

/// Transport health as observed by the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub last_connected: Option<Timestamp>,
    pub error: Option<String>,
    pub reconnect_attempts: u32,
}
