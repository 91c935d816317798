//! Chama client live-data core.
//!
//! Keeps the client's view of contributions, loans, groups and notifications
//! fresh: push channels where the server offers them, polling where it does
//! not, and a single connection status for the UI to show.

pub mod api_client;
pub mod capability;
pub mod config;
pub mod error;
pub mod resources;
pub mod runtime;
pub mod sync;

pub use api_client::ApiClient;
pub use capability::CapabilityRegistry;
pub use config::SyncConfig;
pub use error::SyncError;
pub use runtime::SyncRuntime;
pub use sync::{
    ConnectionMonitor, ConnectionStatusView, ResourcePoller, SubscribeOptions,
    SubscriptionRegistry,
};
