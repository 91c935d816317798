//! Live-data synchronization core.
//!
//! ```text
//!  ResourcePoller ──subscribe──▶ SubscriptionRegistry ──▶ PushTransport
//!        ▲                            │      │               (preferred)
//!        │ change notification        │      └──▶ PollingEngine
//!        └────────────────────────────┘              (fallback)
//!
//!  ConnectionMonitor ◀── channel health ── SubscriptionRegistry
//!  ConnectionStatusView samples monitor + registry
//! ```
//!
//! Every component is explicitly constructed and shared through `Arc`; see
//! [`crate::runtime::SyncRuntime`] for the usual wiring.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod key;
pub mod monitor;
pub mod notification;
pub mod poller;
pub mod polling;
pub mod push;
pub mod registry;
pub mod status_view;

pub use key::SubscriptionKey;
pub use monitor::{ChannelHealth, ConnectionMonitor, MonitorEvent};
pub use notification::{change_callback, ChangeCallback, ChangeKind, ChangeNotification};
pub use poller::{PollerOptions, PollerPhase, ResourcePoller, Snapshot, SnapshotSource};
pub use polling::{PollCancel, PollingEngine, MIN_POLL_INTERVAL};
pub use push::{ChangeSink, PushChannel, PushTransport, WsPushTransport};
pub use registry::{
    DeliveryMode, RegistryStats, SubscribeOptions, SubscriptionHandle, SubscriptionRegistry,
};
pub use status_view::{ConnectionStatusView, StatusReport};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
