//! Per-resource pollers that keep a local snapshot fresh.
//!
//! A [`ResourcePoller`] owns one snapshot of a user's records. Mounting it
//! for a user fetches once right away and, after a grace delay, subscribes
//! through the [`SubscriptionRegistry`]; every `resource-updated`
//! notification from then on triggers a re-fetch.
//!
//! Fetches may overlap. Each one takes the next generation number and its
//! result is applied only while the poller is mounted and no newer result
//! has been applied, so a slow response can never overwrite a fresher one.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{
    change_callback, lock, ChangeCallback, SubscribeOptions, SubscriptionHandle,
    SubscriptionRegistry,
};
use crate::error::SyncError;

/// Where a poller gets its records from.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    /// Resource name used as the subscription key.
    fn resource(&self) -> &'static str;

    /// Fetch the full, ordered record list for `user_id`.
    async fn fetch(&self, user_id: &str) -> Result<Vec<Self::Item>, SyncError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollerPhase {
    /// Not mounted for any user.
    #[default]
    Idle,
    Fetching,
    Ready,
    /// Last fetch failed; items are from the last successful one.
    Error,
}

/// Published state of a poller. Replaced wholesale on every successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    pub phase: PollerPhase,
    /// Generation of the fetch these items came from; 0 before the first.
    pub generation: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            phase: PollerPhase::Idle,
            generation: 0,
            last_synced_at: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerOptions {
    /// Delay between the first fetch and subscribing for updates.
    pub grace: Duration,
    pub subscribe: SubscribeOptions,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(2),
            subscribe: SubscribeOptions {
                polling_interval_ms: 30_000,
                ..SubscribeOptions::default()
            },
        }
    }
}

#[derive(Default)]
struct PollerState {
    user_id: Option<String>,
    /// User whose records the published snapshot holds.
    published_for: Option<String>,
    /// Bumped on every mount so stale grace tasks can tell they lost.
    mount_id: u64,
    /// Last generation handed out.
    generation: u64,
    /// Generation of the last applied success.
    applied: u64,
    grace: Option<JoinHandle<()>>,
    subscription: Option<SubscriptionHandle>,
}

impl PollerState {
    fn is_mounted(&self) -> bool {
        self.user_id.is_some()
    }

    /// Detach from the current user. In-flight fetches become stale.
    fn detach(&mut self) -> Option<SubscriptionHandle> {
        self.user_id = None;
        self.applied = self.generation;
        if let Some(grace) = self.grace.take() {
            grace.abort();
        }
        self.subscription.take()
    }
}

struct PollerInner<S: SnapshotSource> {
    source: S,
    registry: SubscriptionRegistry,
    options: PollerOptions,
    state: Mutex<PollerState>,
    snapshot_tx: watch::Sender<Snapshot<S::Item>>,
}

impl<S: SnapshotSource> PollerInner<S> {
    async fn fetch(&self) -> Result<Snapshot<S::Item>, SyncError> {
        let online = self.registry.monitor().is_online();
        let (generation, user_id) = {
            let mut state = lock(&self.state);
            let Some(user_id) = state.user_id.clone() else {
                return Ok(self.snapshot_tx.borrow().clone());
            };
            if !online {
                let err = SyncError::NetworkUnavailable;
                tracing::debug!(resource = self.source.resource(), "offline, fetch skipped");
                let message = err.user_message();
                self.snapshot_tx.send_modify(|snapshot| {
                    snapshot.phase = PollerPhase::Error;
                    snapshot.last_error = Some(message);
                });
                return Err(err);
            }
            state.generation += 1;
            self.snapshot_tx
                .send_modify(|snapshot| snapshot.phase = PollerPhase::Fetching);
            (state.generation, user_id)
        };

        let result = self.source.fetch(&user_id).await;

        let mut state = lock(&self.state);
        if !state.is_mounted() || generation <= state.applied {
            tracing::debug!(
                resource = self.source.resource(),
                generation,
                applied = state.applied,
                "discarding stale fetch result"
            );
            return match result {
                Ok(_) => Ok(self.snapshot_tx.borrow().clone()),
                Err(e) => Err(e),
            };
        }

        match result {
            Ok(items) => {
                state.applied = generation;
                let snapshot = Snapshot {
                    items,
                    phase: PollerPhase::Ready,
                    generation,
                    last_synced_at: Some(Utc::now()),
                    last_error: None,
                };
                tracing::debug!(
                    resource = self.source.resource(),
                    generation,
                    items = snapshot.items.len(),
                    "snapshot refreshed"
                );
                self.snapshot_tx.send_replace(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                tracing::warn!(
                    resource = self.source.resource(),
                    generation,
                    error = %e,
                    "fetch failed, keeping previous snapshot"
                );
                let message = e.user_message();
                self.snapshot_tx.send_modify(|snapshot| {
                    snapshot.phase = PollerPhase::Error;
                    snapshot.last_error = Some(message);
                });
                Err(e)
            }
        }
    }
}

impl<S: SnapshotSource> Drop for PollerInner<S> {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if let Some(grace) = state.grace.take() {
            grace.abort();
        }
    }
}

/// Keeps one resource's snapshot fresh for the mounted user.
pub struct ResourcePoller<S: SnapshotSource> {
    inner: Arc<PollerInner<S>>,
}

impl<S: SnapshotSource> Clone for ResourcePoller<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: SnapshotSource> ResourcePoller<S> {
    pub fn new(source: S, registry: SubscriptionRegistry, options: PollerOptions) -> Self {
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        Self {
            inner: Arc::new(PollerInner {
                source,
                registry,
                options,
                state: Mutex::new(PollerState::default()),
                snapshot_tx,
            }),
        }
    }

    pub fn resource(&self) -> &'static str {
        self.inner.source.resource()
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// Start keeping the snapshot fresh for `user_id`.
    ///
    /// `None` means no authenticated user: the poller goes idle and its
    /// snapshot is cleared. Re-mounting replaces any previous mount; when the
    /// user changes, the previous user's records are cleared at once. Must be
    /// called from within a tokio runtime.
    pub fn mount(&self, user_id: Option<&str>) {
        let resource = self.resource();
        let (previous, mount_id) = {
            let mut state = lock(&self.inner.state);
            let previous = state.detach();
            state.mount_id += 1;
            state.user_id = user_id.map(str::to_string);
            if state.published_for.is_some() && state.published_for != state.user_id {
                self.inner.snapshot_tx.send_replace(Snapshot::default());
            }
            state.published_for = state.user_id.clone();
            (previous, state.mount_id)
        };
        drop(previous);

        let Some(user_id) = user_id else {
            tracing::info!(resource, "no user, poller idle");
            self.inner.snapshot_tx.send_replace(Snapshot::default());
            return;
        };
        tracing::info!(resource, user_id, "poller mounted");

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn({
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    // Failures are recorded in the snapshot.
                    let _ = inner.fetch().await;
                }
            }
        });

        let grace = tokio::spawn(subscribe_after_grace(
            weak,
            mount_id,
            user_id.to_string(),
            self.inner.options.grace,
        ));
        let mut state = lock(&self.inner.state);
        if state.mount_id == mount_id {
            state.grace = Some(grace);
        } else {
            grace.abort();
        }
    }

    /// Stop refreshing. Results of fetches still in flight are discarded.
    pub fn unmount(&self) {
        let subscription = {
            let mut state = lock(&self.inner.state);
            if !state.is_mounted() {
                return;
            }
            state.mount_id += 1;
            state.detach()
        };
        drop(subscription);
        tracing::info!(resource = self.resource(), "poller unmounted");
    }

    /// Fetch now for the mounted user and return the published snapshot.
    ///
    /// When this fetch lost to a newer one, the newer snapshot is returned.
    pub async fn fetch_snapshot(&self) -> Result<Snapshot<S::Item>, SyncError> {
        self.inner.fetch().await
    }

    pub fn snapshot(&self) -> Snapshot<S::Item> {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot<S::Item>> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn phase(&self) -> PollerPhase {
        self.inner.snapshot_tx.borrow().phase
    }

    pub fn is_mounted(&self) -> bool {
        lock(&self.inner.state).is_mounted()
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.inner.state).subscription.is_some()
    }
}

async fn subscribe_after_grace<S: SnapshotSource>(
    weak: Weak<PollerInner<S>>,
    mount_id: u64,
    user_id: String,
    grace: Duration,
) {
    tokio::time::sleep(grace).await;

    let Some(inner) = weak.upgrade() else {
        return;
    };
    if lock(&inner.state).mount_id != mount_id {
        return;
    }

    let handle = inner.registry.subscribe(
        inner.source.resource(),
        &user_id,
        refetch_on_change(weak),
        inner.options.subscribe.clone(),
    );

    let mut state = lock(&inner.state);
    if state.mount_id == mount_id {
        state.subscription = Some(handle);
        state.grace = None;
    } else {
        drop(state);
        handle.unsubscribe();
    }
}

fn refetch_on_change<S: SnapshotSource>(weak: Weak<PollerInner<S>>) -> ChangeCallback {
    change_callback(move |notification| {
        let weak = weak.clone();
        async move {
            if !notification.is_update() {
                tracing::warn!(
                    key = %notification.key,
                    payload = ?notification.payload,
                    "change channel reported an error"
                );
                return;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let _ = inner.fetch().await;
        }
    })
}
