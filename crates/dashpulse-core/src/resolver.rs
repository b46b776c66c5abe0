//! Conflict resolution between incoming updates and held state.
//!
//! The transport does not guarantee ordering, so every update is compared with
//! the reconciled state for its key before it is applied. Each data type is
//! decided on its own:
//!
//! 1. **Timestamp conflict** - the update is older than the value held for that
//!    data type. The incoming value is discarded.
//! 2. **Data-integrity conflict** - the value changed kind, a sequence grew or
//!    shrank by more than the configured ratio, or a record lost keys. The values
//!    are merged instead of replaced.
//! 3. Otherwise the incoming value replaces the held one.
//!
//! The timestamp rule is checked first, so a stale payload is never merged.

use crate::model::{DataUpdate, ReconciledState, Timestamp};
use serde_json::Value;
use std::fmt;

/// Default relative element-count change that flags a sequence as suspect.
pub const DEFAULT_LENGTH_CHANGE_THRESHOLD: f64 = 0.5;

/// Resolver tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverConfig {
    /// Relative sequence length change above which a payload is treated as
    /// partial or corrupted.
    pub length_change_threshold: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            length_change_threshold: DEFAULT_LENGTH_CHANGE_THRESHOLD,
        }
    }
}

/// Coarse JSON value kind used for mismatch detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Sequence,
    Record,
}

impl ValueKind {
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Sequence,
            Value::Object(_) => ValueKind::Record,
        }
    }
}

/// Why a value was flagged by the integrity heuristic.
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrityIssue {
    /// The value changed kind.
    TypeMismatch { held: ValueKind, incoming: ValueKind },
    /// A sequence changed length by more than the threshold.
    LengthChange { held: usize, incoming: usize },
    /// A record omitted keys that were held.
    MissingKeys { missing: usize },
}

/// A conflict detected for one data type.
#[derive(Debug, Clone, PartialEq)]
pub enum Conflict {
    /// The incoming value is older than the held one.
    Timestamp {
        data_type: String,
        held: Timestamp,
        incoming: Timestamp,
    },
    /// The incoming value looks partial or corrupted.
    DataIntegrity {
        data_type: String,
        issue: IntegrityIssue,
    },
}

impl Conflict {
    /// Data type the conflict applies to.
    #[must_use]
    pub fn data_type(&self) -> &str {
        match self {
            Conflict::Timestamp { data_type, .. } | Conflict::DataIntegrity { data_type, .. } => {
                data_type
            }
        }
    }

    /// Short label, used for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Conflict::Timestamp { .. } => "timestamp",
            Conflict::DataIntegrity { .. } => "data_integrity",
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::Timestamp {
                data_type,
                held,
                incoming,
            } => write!(f, "{data_type}: update at {incoming} is older than {held}"),
            Conflict::DataIntegrity { data_type, issue } => {
                write!(f, "{data_type}: integrity check failed ({issue:?})")
            }
        }
    }
}

/// Outcome of resolving one update.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The reconciled state after the update.
    pub state: ReconciledState,
    /// Data types whose incoming value replaced the held one.
    pub applied: Vec<String>,
    /// Data types merged with the held value.
    pub merged: Vec<String>,
    /// Data types whose incoming value was dropped as stale.
    pub discarded: Vec<String>,
    /// Every conflict detected.
    pub conflicts: Vec<Conflict>,
}

impl Resolution {
    /// Whether the state differs from the one passed in.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.applied.is_empty() || !self.merged.is_empty()
    }
}

/// Pure decision logic; holds no state of its own.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    config: ResolverConfig,
}

impl ConflictResolver {
    #[must_use]
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// List the conflicts an update would cause against the held state.
    #[must_use]
    pub fn detect_conflicts(
        &self,
        update: &DataUpdate,
        current: Option<&ReconciledState>,
    ) -> Vec<Conflict> {
        let Some(current) = current else {
            return Vec::new();
        };

        let mut conflicts = Vec::new();
        for (data_type, incoming) in &update.data {
            if let Some(held) = current.held_timestamp(data_type) {
                if update.timestamp < held {
                    conflicts.push(Conflict::Timestamp {
                        data_type: data_type.clone(),
                        held,
                        incoming: update.timestamp,
                    });
                }
            }

            if let Some(held) = current.value(data_type) {
                if let Some(issue) = self.integrity_issue(held, incoming) {
                    conflicts.push(Conflict::DataIntegrity {
                        data_type: data_type.clone(),
                        issue,
                    });
                }
            }
        }

        conflicts
    }

    /// Derive the reconciled state that results from applying `update`.
    ///
    /// `current` is left untouched.
    #[must_use]
    pub fn resolve(&self, update: &DataUpdate, current: Option<&ReconciledState>) -> Resolution {
        let conflicts = self.detect_conflicts(update, current);
        let mut state = current.cloned().unwrap_or_default();
        let mut applied = Vec::new();
        let mut merged = Vec::new();
        let mut discarded = Vec::new();

        for (data_type, incoming) in &update.data {
            let stale = conflicts.iter().any(|c| {
                matches!(c, Conflict::Timestamp { data_type: d, .. } if d == data_type)
            });
            if stale {
                discarded.push(data_type.clone());
                continue;
            }

            let suspect = conflicts.iter().any(|c| {
                matches!(c, Conflict::DataIntegrity { data_type: d, .. } if d == data_type)
            });
            let value = match (suspect, state.data.get(data_type)) {
                (true, Some(held)) => {
                    merged.push(data_type.clone());
                    merge_values(held, incoming)
                }
                _ => {
                    applied.push(data_type.clone());
                    incoming.clone()
                }
            };

            state.data.insert(data_type.clone(), value);
            let held_at = state
                .field_timestamps
                .entry(data_type.clone())
                .or_insert(update.timestamp);
            *held_at = (*held_at).max(update.timestamp);
        }

        if !applied.is_empty() || !merged.is_empty() {
            state.timestamp = state.timestamp.max(update.timestamp);
        }

        Resolution {
            state,
            applied,
            merged,
            discarded,
            conflicts,
        }
    }

    fn integrity_issue(&self, held: &Value, incoming: &Value) -> Option<IntegrityIssue> {
        match (held, incoming) {
            (Value::Null, _) => None,
            (Value::Array(held), Value::Array(incoming)) => {
                if held.is_empty() {
                    return None;
                }
                let delta = held.len().abs_diff(incoming.len()) as f64;
                (delta / held.len() as f64 > self.config.length_change_threshold).then(|| {
                    IntegrityIssue::LengthChange {
                        held: held.len(),
                        incoming: incoming.len(),
                    }
                })
            }
            (Value::Object(held), Value::Object(incoming)) => {
                let missing = held.keys().filter(|k| !incoming.contains_key(*k)).count();
                (missing > 0).then_some(IntegrityIssue::MissingKeys { missing })
            }
            (held, incoming) => {
                let (held, incoming) = (ValueKind::of(held), ValueKind::of(incoming));
                (held != incoming).then_some(IntegrityIssue::TypeMismatch { held, incoming })
            }
        }
    }
}

/// Merge an incoming value into a held one.
///
/// Sequences are unioned by structural equality (held order kept, unseen
/// incoming elements appended). Records are shallow-merged with incoming keys
/// winning. Anything else is last-write-wins.
fn merge_values(held: &Value, incoming: &Value) -> Value {
    match (held, incoming) {
        (Value::Array(held), Value::Array(incoming)) => {
            let mut union = held.clone();
            for element in incoming {
                if !union.contains(element) {
                    union.push(element.clone());
                }
            }
            Value::Array(union)
        }
        (Value::Object(held), Value::Object(incoming)) => {
            let mut record = held.clone();
            for (key, value) in incoming {
                record.insert(key.clone(), value.clone());
            }
            Value::Object(record)
        }
        (_, incoming) => incoming.clone(),
    }
}
