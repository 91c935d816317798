//! Single entry point for "keep me updated about resource X filtered by Y".
//!
//! Each key gets at most one delivery mechanism, shared by every listener of
//! that key and torn down when the last [`SubscriptionHandle`] goes away. A
//! supervisor task per key drives the mechanism:
//!
//! ```text
//!             ┌──────────────┐  open ok   ┌──────┐  channel closed
//!  subscribe ─▶ establishing ├───────────▶│ push ├──────────────┐
//!             └──┬───────▲───┘            └──────┘              │
//!   retries      │       │ reconnect signal                     │
//!   exhausted    ▼       │ (retry counter reset)                │
//!             ┌──────────┴──┐                                   │
//!             │   polling   │◀──── no push transport            │
//!             └─────────────┘                                   │
//!                    ▲                                          │
//!                    └──────────── establishing ◀───────────────┘
//! ```
//!
//! All map updates happen synchronously inside `subscribe`/`unsubscribe`, so
//! two registrations of the same key can never both create a mechanism.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::monitor::{ChannelHealth, ConnectionMonitor, MonitorEvent};
use super::polling::{PollCancel, PollingEngine, MIN_POLL_INTERVAL};
use super::push::{ChangeSink, PushChannel, PushTransport};
use super::{change_callback, lock, ChangeCallback, ChangeNotification, SubscriptionKey};

/// Options recognized by [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Retries after the first failed attempt to open a push channel.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub retry_delay_ms: u64,
    /// Poll when push cannot be established.
    pub fallback_to_polling: bool,
    pub polling_interval_ms: u64,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 2000,
            fallback_to_polling: true,
            polling_interval_ms: 5000,
        }
    }
}

impl SubscribeOptions {
    /// Delay before retry number `attempt + 1`: `retry_delay_ms * 2^attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms).max(MIN_POLL_INTERVAL)
    }
}

/// How a subscription currently receives updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Establishing,
    Push,
    Polling,
    /// Push failed and polling fallback is disabled.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub subscriptions: usize,
    pub listeners: usize,
    pub establishing: usize,
    pub push: usize,
    pub polling: usize,
    pub failed: usize,
}

struct Entry {
    listeners: Vec<(u64, ChangeCallback)>,
    mode: DeliveryMode,
    /// Push attempts since the last success or reconnect signal.
    attempts: u32,
    poll: Option<PollCancel>,
    supervisor: Option<JoinHandle<()>>,
}

impl Drop for Entry {
    fn drop(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.cancel();
        }
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
    }
}

struct RegistryInner {
    entries: Mutex<HashMap<SubscriptionKey, Entry>>,
    next_listener: AtomicU64,
    monitor: Arc<ConnectionMonitor>,
    engine: Arc<PollingEngine>,
    transport: Option<Arc<dyn PushTransport>>,
}

impl RegistryInner {
    fn with_entry<R>(&self, key: &SubscriptionKey, f: impl FnOnce(&mut Entry) -> R) -> Option<R> {
        lock(&self.entries).get_mut(key).map(f)
    }

    /// Health is reported under the entries lock so a torn-down key never
    /// leaves a stale report behind.
    fn set_mode(&self, key: &SubscriptionKey, mode: DeliveryMode, health: ChannelHealth) {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get_mut(key) {
            entry.mode = mode;
            self.monitor.report_channel(key, health);
        }
    }

    fn release(&self, key: &SubscriptionKey, listener_id: u64) {
        let removed = {
            let mut entries = lock(&self.entries);
            let Some(entry) = entries.get_mut(key) else {
                return;
            };
            entry.listeners.retain(|(id, _)| *id != listener_id);
            tracing::debug!(key = %key, ref_count = entry.listeners.len(), "listener released");
            if entry.listeners.is_empty() {
                self.monitor.forget_channel(key);
                entries.remove(key)
            } else {
                None
            }
        };

        if let Some(entry) = removed {
            // Drop stops the poll timer and the supervisor.
            drop(entry);
            tracing::info!(key = %key, "subscription torn down");
        }
    }

    fn dispatch(self: &Arc<Self>, key: SubscriptionKey) -> ChangeCallback {
        let inner = Arc::downgrade(self);
        change_callback(move |notification: ChangeNotification| {
            let inner = inner.clone();
            let key = key.clone();
            async move {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let listeners: Vec<ChangeCallback> = inner
                    .with_entry(&key, |e| e.listeners.iter().map(|(_, cb)| cb.clone()).collect())
                    .unwrap_or_default();
                drop(inner);
                join_all(listeners.iter().map(|cb| cb(notification.clone()))).await;
            }
        })
    }

    fn start_polling(self: &Arc<Self>, key: &SubscriptionKey, options: &SubscribeOptions) {
        let already = self
            .with_entry(key, |e| e.poll.is_some())
            .unwrap_or(true);
        if already {
            return;
        }
        let cancel = self.engine.start_polling(
            key.clone(),
            options.polling_interval(),
            self.dispatch(key.clone()),
        );
        // The entry may have gone while the loop was starting; dropping the
        // cancel handle then stops the loop again.
        self.with_entry(key, move |e| e.poll = Some(cancel));
    }

    fn stop_polling(&self, key: &SubscriptionKey) {
        if let Some(Some(poll)) = self.with_entry(key, |e| e.poll.take()) {
            poll.cancel();
            tracing::info!(key = %key, "push channel live, polling fallback stopped");
        }
    }
}

/// Registry of active subscriptions. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    /// A registry that polls every subscription.
    pub fn new(monitor: Arc<ConnectionMonitor>, engine: Arc<PollingEngine>) -> Self {
        Self::with_transport(monitor, engine, None)
    }

    /// A registry that tries `transport` first and polls as a fallback.
    pub fn with_transport(
        monitor: Arc<ConnectionMonitor>,
        engine: Arc<PollingEngine>,
        transport: Option<Arc<dyn PushTransport>>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                monitor,
                engine,
                transport,
            }),
        }
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.inner.monitor
    }

    pub fn engine(&self) -> &Arc<PollingEngine> {
        &self.inner.engine
    }

    /// Subscribe to changes of `resource` filtered by `filter`.
    ///
    /// If the key is already active, `on_change` joins its listeners and the
    /// existing mechanism is reused; `options` of later calls are ignored.
    /// Must be called from within a tokio runtime.
    pub fn subscribe(
        &self,
        resource: &str,
        filter: &str,
        on_change: ChangeCallback,
        options: SubscribeOptions,
    ) -> SubscriptionHandle {
        let key = SubscriptionKey::new(resource, filter);
        let listener_id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);

        let created = {
            let mut entries = lock(&self.inner.entries);
            match entries.get_mut(&key) {
                Some(entry) => {
                    entry.listeners.push((listener_id, on_change));
                    tracing::debug!(
                        key = %key,
                        ref_count = entry.listeners.len(),
                        "reusing active subscription"
                    );
                    false
                }
                None => {
                    let supervisor = tokio::spawn(supervise(
                        Arc::downgrade(&self.inner),
                        key.clone(),
                        options.clone(),
                    ));
                    entries.insert(
                        key.clone(),
                        Entry {
                            listeners: vec![(listener_id, on_change)],
                            mode: DeliveryMode::Establishing,
                            attempts: 0,
                            poll: None,
                            supervisor: Some(supervisor),
                        },
                    );
                    self.inner.monitor.report_channel(&key, ChannelHealth::Pending);
                    true
                }
            }
        };

        if created {
            tracing::info!(key = %key, ?options, "subscription created");
        }

        SubscriptionHandle {
            key,
            listener_id,
            registry: Arc::downgrade(&self.inner),
            released: AtomicBool::new(false),
        }
    }

    pub fn is_subscribed(&self, key: &SubscriptionKey) -> bool {
        lock(&self.inner.entries).contains_key(key)
    }

    /// Number of live handles for `key`.
    pub fn ref_count(&self, key: &SubscriptionKey) -> usize {
        self.inner.with_entry(key, |e| e.listeners.len()).unwrap_or(0)
    }

    pub fn mode(&self, key: &SubscriptionKey) -> Option<DeliveryMode> {
        self.inner.with_entry(key, |e| e.mode)
    }

    /// Push attempts made for `key` since its last success or reconnect signal.
    pub fn attempts(&self, key: &SubscriptionKey) -> Option<u32> {
        self.inner.with_entry(key, |e| e.attempts)
    }

    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = lock(&self.inner.entries).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> RegistryStats {
        let entries = lock(&self.inner.entries);
        let mut stats = RegistryStats {
            subscriptions: entries.len(),
            ..RegistryStats::default()
        };
        for entry in entries.values() {
            stats.listeners += entry.listeners.len();
            match entry.mode {
                DeliveryMode::Establishing => stats.establishing += 1,
                DeliveryMode::Push => stats.push += 1,
                DeliveryMode::Polling => stats.polling += 1,
                DeliveryMode::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Force-stop every subscription and poll loop and reset all counters.
    ///
    /// Outstanding handles become inert; releasing them is a no-op.
    pub fn cleanup(&self) {
        let drained: Vec<_> = {
            let mut entries = lock(&self.inner.entries);
            self.inner.monitor.reset_channels();
            entries.drain().collect()
        };
        let count = drained.len();
        drop(drained);
        self.inner.engine.stop_all();
        tracing::info!(subscriptions = count, "registry cleaned up");
    }
}

/// Supervisor for one key: push with backoff, polling fallback, reconnects.
async fn supervise(inner: Weak<RegistryInner>, key: SubscriptionKey, options: SubscribeOptions) {
    let Some(strong) = inner.upgrade() else {
        return;
    };
    let Some(transport) = strong.transport.clone() else {
        strong.start_polling(&key, &options);
        strong.set_mode(&key, DeliveryMode::Polling, ChannelHealth::Polling);
        return;
    };
    let monitor = strong.monitor.clone();
    let mut events = monitor.subscribe_events();
    drop(strong);

    loop {
        let (sink, mut rx) = ChangeSink::channel(key.clone());
        match establish(&inner, &key, &options, transport.as_ref(), &monitor, &mut events, sink)
            .await
        {
            Some(mut channel) => {
                let Some(strong) = inner.upgrade() else {
                    return;
                };
                strong.stop_polling(&key);
                strong.set_mode(&key, DeliveryMode::Push, ChannelHealth::Live);
                let dispatch = strong.dispatch(key.clone());
                drop(strong);

                loop {
                    tokio::select! {
                        Some(notification) = rx.recv() => dispatch(notification).await,
                        _ = channel.closed() => break,
                    }
                }

                tracing::warn!(key = %key, "push channel lost, re-establishing");
                let Some(strong) = inner.upgrade() else {
                    return;
                };
                strong.set_mode(&key, DeliveryMode::Establishing, ChannelHealth::Pending);
            }
            None => {
                let Some(strong) = inner.upgrade() else {
                    return;
                };
                if options.fallback_to_polling {
                    strong.start_polling(&key, &options);
                    strong.set_mode(&key, DeliveryMode::Polling, ChannelHealth::Failed);
                } else {
                    strong.set_mode(&key, DeliveryMode::Failed, ChannelHealth::Failed);
                }
                drop(strong);

                // Stay on the fallback until the network comes back.
                loop {
                    match events.recv().await {
                        Ok(MonitorEvent::Online) => break,
                        Ok(MonitorEvent::Offline) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
                tracing::info!(key = %key, "reconnect signal, retrying push");
            }
        }
    }
}

/// Try to open a push channel, retrying with exponential backoff.
///
/// Returns `None` after `max_retries` retries have failed. Attempts wait
/// while the device is offline; a reconnect signal resets the counter.
async fn establish(
    inner: &Weak<RegistryInner>,
    key: &SubscriptionKey,
    options: &SubscribeOptions,
    transport: &dyn PushTransport,
    monitor: &ConnectionMonitor,
    events: &mut broadcast::Receiver<MonitorEvent>,
    sink: ChangeSink,
) -> Option<PushChannel> {
    let mut attempt = 0u32;
    loop {
        while !monitor.is_online() {
            match events.recv().await {
                Ok(MonitorEvent::Online) => attempt = 0,
                Ok(MonitorEvent::Offline) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }

        let strong = inner.upgrade()?;
        strong.with_entry(key, |e| e.attempts = attempt + 1);
        drop(strong);

        match transport.open(key, sink.clone()).await {
            Ok(channel) => {
                tracing::info!(key = %key, attempt = attempt + 1, "push channel established");
                return Some(channel);
            }
            Err(e) => {
                if attempt >= options.max_retries {
                    tracing::warn!(
                        key = %key,
                        attempts = attempt + 1,
                        error = %e,
                        "push retries exhausted"
                    );
                    return None;
                }
                let delay = options.delay_for_attempt(attempt);
                tracing::info!(
                    key = %key,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "push channel failed, retrying (attempt {})",
                    attempt + 2
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => attempt += 1,
                    Ok(MonitorEvent::Online) = events.recv() => attempt = 0,
                }
            }
        }
    }
}

/// One consumer's share of a subscription.
///
/// `unsubscribe` (or drop) releases it; the key's mechanism stops when the
/// last handle is released.
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct SubscriptionHandle {
    key: SubscriptionKey,
    listener_id: u64,
    registry: Weak<RegistryInner>,
    released: AtomicBool,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Whether this handle still holds a share of an active subscription.
    pub fn is_active(&self) -> bool {
        if self.released.load(Ordering::SeqCst) {
            return false;
        }
        self.registry.upgrade().is_some_and(|inner| {
            inner
                .with_entry(&self.key, |e| {
                    e.listeners.iter().any(|(id, _)| *id == self.listener_id)
                })
                .unwrap_or(false)
        })
    }

    /// Release this handle. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            inner.release(&self.key, self.listener_id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .field("listener_id", &self.listener_id)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_the_base_delay() {
        let options = SubscribeOptions::default();
        assert_eq!(options.delay_for_attempt(0), Duration::from_millis(2000));
        assert_eq!(options.delay_for_attempt(1), Duration::from_millis(4000));
        assert_eq!(options.delay_for_attempt(2), Duration::from_millis(8000));
        assert_eq!(
            options.delay_for_attempt(200),
            Duration::from_millis(u64::MAX)
        );
    }

    #[test]
    fn zero_interval_is_clamped() {
        let options = SubscribeOptions {
            polling_interval_ms: 0,
            ..SubscribeOptions::default()
        };
        assert_eq!(options.polling_interval(), MIN_POLL_INTERVAL);
    }
}
