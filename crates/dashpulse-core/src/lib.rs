//! # dashpulse-core
//!
//! Connection-independent state for the dashpulse synchronization client.
//!
//! - **Registry** - What the dashboard is subscribed to, kept across reconnects
//! - **Resolver** - Reconciles out-of-order and partial updates with held state
//! - **Buffer** - Bounded per-key history of accepted updates
//! - **Notification** - Capped notification log
//! - **Store** - Shared snapshot plus event fan-out for UI consumers
//!
//! ## Data flow
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ DataUpdate  │────▶│  Resolver   │────▶│ SharedStore │───▶ UI receivers
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │ DataBuffer  │
//!                     └─────────────┘
//! ```
//!
//! Nothing here performs I/O. The client crate owns the single task that
//! drives these types.

pub mod buffer;
pub mod model;
pub mod notification;
pub mod registry;
pub mod resolver;
pub mod store;

pub use buffer::{BufferedEntry, DataBuffer, DEFAULT_BUFFER_CAPACITY};
pub use model::{
    now_millis, ConnectionStatus, DataUpdate, FilterSet, ReconciledState, StateKey, Timestamp,
};
pub use notification::{Notification, NotificationLog, DEFAULT_NOTIFICATION_CAPACITY};
pub use registry::{
    RegistryError, Subscription, SubscriptionId, SubscriptionRegistry, SubscriptionSpec,
    SubscriptionState,
};
pub use resolver::{
    Conflict, ConflictResolver, Resolution, ResolverConfig, DEFAULT_LENGTH_CHANGE_THRESHOLD,
};
pub use store::{SharedStore, StoreEvent, StoreWriter, DEFAULT_EVENT_CAPACITY};
