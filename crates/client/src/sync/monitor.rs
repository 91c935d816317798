//! Device reachability and the derived connection status.
//!
//! The monitor is the single source of truth for live-data health. The
//! registry reports per-subscription channel health into it; the status is
//! derived from reachability plus those reports:
//!
//! - offline → `Disconnected`, regardless of anything else
//! - any subscription out of retries → `Error`
//! - any subscription still establishing → `Connecting`
//! - otherwise → `Connected`

use std::collections::HashMap;
use std::sync::Mutex;

use chama_shared::ConnectionStatus;
use tokio::sync::{broadcast, watch};

use super::{lock, SubscriptionKey};

/// Health of one subscription's delivery mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelHealth {
    /// Trying to open a push channel.
    Pending,
    /// Push channel open.
    Live,
    /// Polling without a push transport.
    Polling,
    /// Push retries exhausted.
    Failed,
}

/// Reachability changes broadcast to subscriptions. `Online` is the
/// reconnect signal: receivers reset their retry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    Online,
    Offline,
}

#[derive(Debug)]
struct MonitorState {
    online: bool,
    channels: HashMap<SubscriptionKey, ChannelHealth>,
}

impl MonitorState {
    fn derive_status(&self) -> ConnectionStatus {
        if !self.online {
            ConnectionStatus::Disconnected
        } else if self.channels.values().any(|h| *h == ChannelHealth::Failed) {
            ConnectionStatus::Error
        } else if self.channels.values().any(|h| *h == ChannelHealth::Pending) {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Connected
        }
    }
}

#[derive(Debug)]
pub struct ConnectionMonitor {
    state: Mutex<MonitorState>,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: broadcast::Sender<MonitorEvent>,
}

impl ConnectionMonitor {
    /// A monitor for a device that starts online.
    pub fn new() -> Self {
        Self::with_network(true)
    }

    pub fn with_network(online: bool) -> Self {
        let state = MonitorState {
            online,
            channels: HashMap::new(),
        };
        let (status_tx, _) = watch::channel(state.derive_status());
        let (events_tx, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(state),
            status_tx,
            events_tx,
        }
    }

    /// Current status. Never blocks on I/O.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        lock(&self.state).online
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events_tx.subscribe()
    }

    /// The device regained connectivity.
    ///
    /// Subscriptions that ran out of retries go back to pending and the
    /// reconnect signal is broadcast. With nothing pending the status settles
    /// on `Connected`.
    pub fn report_network_online(&self) {
        let mut state = lock(&self.state);
        if state.online {
            tracing::debug!("network online reported while already online");
            return;
        }
        state.online = true;
        for health in state.channels.values_mut() {
            if *health == ChannelHealth::Failed {
                *health = ChannelHealth::Pending;
            }
        }
        tracing::info!(subscriptions = state.channels.len(), "network online, reconnecting");
        self.publish(ConnectionStatus::Connecting);
        self.publish(state.derive_status());
        drop(state);

        let _ = self.events_tx.send(MonitorEvent::Online);
    }

    /// The device lost connectivity. Status is `Disconnected` when this returns.
    pub fn report_network_offline(&self) {
        let mut state = lock(&self.state);
        let was_online = state.online;
        state.online = false;
        self.publish(ConnectionStatus::Disconnected);
        drop(state);

        if was_online {
            tracing::warn!("network offline");
            let _ = self.events_tx.send(MonitorEvent::Offline);
        }
    }

    /// Health last reported for `key`.
    pub fn channel_health(&self, key: &SubscriptionKey) -> Option<ChannelHealth> {
        lock(&self.state).channels.get(key).copied()
    }

    pub(crate) fn report_channel(&self, key: &SubscriptionKey, health: ChannelHealth) {
        let mut state = lock(&self.state);
        let previous = state.channels.insert(key.clone(), health);
        if previous != Some(health) {
            tracing::debug!(key = %key, ?health, "channel health changed");
        }
        self.publish(state.derive_status());
    }

    pub(crate) fn forget_channel(&self, key: &SubscriptionKey) {
        let mut state = lock(&self.state);
        if state.channels.remove(key).is_some() {
            self.publish(state.derive_status());
        }
    }

    /// Drop all channel reports (registry cleanup).
    pub(crate) fn reset_channels(&self) {
        let mut state = lock(&self.state);
        state.channels.clear();
        self.publish(state.derive_status());
    }

    fn publish(&self, status: ConnectionStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            tracing::info!(from = %previous, to = %status, "connection status changed");
        }
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}
