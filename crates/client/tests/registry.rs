use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chama_client::sync::{
    change_callback, ChangeCallback, ChangeNotification, ChangeSink, ChannelHealth,
    ConnectionMonitor, DeliveryMode, PollingEngine, PushChannel, PushTransport, RegistryStats,
    SubscribeOptions, SubscriptionKey, SubscriptionRegistry,
};
use chama_client::SyncError;
use chama_shared::ConnectionStatus;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn counting(counter: Arc<AtomicUsize>) -> ChangeCallback {
    change_callback(move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    })
}

fn recording(seen: Arc<Mutex<Vec<ChangeNotification>>>) -> ChangeCallback {
    change_callback(move |n| {
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().push(n);
        }
    })
}

fn polling_every(millis: u64) -> SubscribeOptions {
    SubscribeOptions {
        polling_interval_ms: millis,
        ..SubscribeOptions::default()
    }
}

/// Push transport that fails a scripted number of times, then succeeds.
#[derive(Default)]
struct ScriptedTransport {
    failures: AtomicUsize,
    attempts: Mutex<Vec<Instant>>,
    channels: Mutex<Vec<(ChangeSink, Option<oneshot::Sender<()>>)>>,
}

impl ScriptedTransport {
    fn failing(times: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(times),
            ..Self::default()
        })
    }

    fn attempt_offsets(&self, start: Instant) -> Vec<u64> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|t| (*t - start).as_millis() as u64)
            .collect()
    }

    fn opened(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    fn sink(&self, index: usize) -> ChangeSink {
        self.channels.lock().unwrap()[index].0.clone()
    }

    fn close(&self, index: usize) {
        if let Some(tx) = self.channels.lock().unwrap()[index].1.take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn open(&self, key: &SubscriptionKey, sink: ChangeSink) -> Result<PushChannel, SyncError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(SyncError::channel(key, "connection refused"));
        }

        let (tx, rx) = oneshot::channel::<()>();
        self.channels.lock().unwrap().push((sink, Some(tx)));
        Ok(PushChannel::spawn(async move {
            let _ = rx.await;
        }))
    }
}

struct Fixture {
    monitor: Arc<ConnectionMonitor>,
    engine: Arc<PollingEngine>,
    registry: SubscriptionRegistry,
}

fn polling_only() -> Fixture {
    let monitor = Arc::new(ConnectionMonitor::new());
    let engine = Arc::new(PollingEngine::new());
    let registry = SubscriptionRegistry::new(monitor.clone(), engine.clone());
    Fixture {
        monitor,
        engine,
        registry,
    }
}

fn with_push(transport: Arc<ScriptedTransport>, online: bool) -> Fixture {
    let monitor = Arc::new(ConnectionMonitor::with_network(online));
    let engine = Arc::new(PollingEngine::new());
    let registry = SubscriptionRegistry::with_transport(
        monitor.clone(),
        engine.clone(),
        Some(transport as Arc<dyn PushTransport>),
    );
    Fixture {
        monitor,
        engine,
        registry,
    }
}

#[tokio::test(start_paused = true)]
async fn groups_poll_fires_three_times_in_3500ms() {
    let fx = polling_only();
    let calls = Arc::new(AtomicUsize::new(0));

    let _handle = fx
        .registry
        .subscribe("groups", "u1", counting(calls.clone()), polling_every(1000));

    sleep(ms(3500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        fx.registry.mode(&SubscriptionKey::new("groups", "u1")),
        Some(DeliveryMode::Polling)
    );
    assert_eq!(fx.monitor.status(), ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn subscribing_twice_shares_one_timer_and_fans_out() {
    let fx = polling_only();
    let key = SubscriptionKey::new("groups", "u1");
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let a = fx
        .registry
        .subscribe("groups", "u1", counting(first.clone()), polling_every(1000));
    let b = fx
        .registry
        .subscribe("groups", "u1", counting(second.clone()), polling_every(250));

    assert_eq!(fx.registry.ref_count(&key), 2);
    assert_eq!(fx.registry.active_keys(), vec![key.clone()]);

    sleep(ms(3500)).await;
    assert_eq!(fx.engine.active_keys(), vec![key.clone()]);
    // The second call's options are ignored: one 1000ms timer serves both.
    assert_eq!(first.load(Ordering::SeqCst), 3);
    assert_eq!(second.load(Ordering::SeqCst), 3);

    a.unsubscribe();
    assert_eq!(fx.registry.ref_count(&key), 1);
    assert!(fx.engine.is_polling(&key));

    sleep(ms(1000)).await;
    assert_eq!(first.load(Ordering::SeqCst), 3);
    assert_eq!(second.load(Ordering::SeqCst), 4);
    drop(b);
    assert!(!fx.registry.is_subscribed(&key));
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_stops_all_callbacks() {
    let fx = polling_only();
    let key = SubscriptionKey::new("notifications", "u1");
    let calls = Arc::new(AtomicUsize::new(0));

    let handle =
        fx.registry
            .subscribe("notifications", "u1", counting(calls.clone()), polling_every(500));
    sleep(ms(1200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(handle.is_active());

    handle.unsubscribe();
    handle.unsubscribe();
    assert!(!handle.is_active());
    assert!(!fx.registry.is_subscribed(&key));
    assert!(!fx.engine.is_polling(&key));
    assert_eq!(fx.monitor.channel_health(&key), None);

    sleep(ms(10_000)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_unsubscribes() {
    let fx = polling_only();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let _handle =
            fx.registry
                .subscribe("groups", "u2", counting(calls.clone()), polling_every(100));
        sleep(ms(150)).await;
    }
    sleep(ms(1000)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(fx.registry.active_keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn push_retries_back_off_exponentially_then_fall_back() {
    let transport = ScriptedTransport::failing(usize::MAX);
    let fx = with_push(transport.clone(), true);
    let key = SubscriptionKey::new("contributions", "u1");
    let calls = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let _handle = fx.registry.subscribe(
        "contributions",
        "u1",
        counting(calls.clone()),
        SubscribeOptions {
            max_retries: 3,
            retry_delay_ms: 2000,
            fallback_to_polling: true,
            polling_interval_ms: 1000,
        },
    );

    sleep(ms(13_900)).await;
    assert_eq!(transport.attempt_offsets(start), vec![0, 2000, 6000]);
    assert_eq!(fx.registry.mode(&key), Some(DeliveryMode::Establishing));
    assert_eq!(fx.monitor.status(), ConnectionStatus::Connecting);
    assert!(!fx.engine.is_polling(&key));

    sleep(ms(3_600)).await;
    assert_eq!(transport.attempt_offsets(start), vec![0, 2000, 6000, 14_000]);
    assert_eq!(fx.registry.attempts(&key), Some(4));
    assert_eq!(fx.registry.mode(&key), Some(DeliveryMode::Polling));
    assert_eq!(fx.monitor.channel_health(&key), Some(ChannelHealth::Failed));
    assert_eq!(fx.monitor.status(), ConnectionStatus::Error);
    assert!(fx.engine.is_polling(&key));
    // Ticks at 15000, 16000 and 17000.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn fallback_disabled_marks_the_subscription_failed() {
    let transport = ScriptedTransport::failing(usize::MAX);
    let fx = with_push(transport.clone(), true);
    let key = SubscriptionKey::new("groups", "u1");
    let start = Instant::now();

    let _handle = fx.registry.subscribe(
        "groups",
        "u1",
        counting(Arc::new(AtomicUsize::new(0))),
        SubscribeOptions {
            max_retries: 1,
            retry_delay_ms: 100,
            fallback_to_polling: false,
            polling_interval_ms: 1000,
        },
    );

    sleep(ms(5000)).await;
    assert_eq!(transport.attempt_offsets(start), vec![0, 100]);
    assert_eq!(fx.registry.mode(&key), Some(DeliveryMode::Failed));
    assert!(!fx.engine.is_polling(&key));
    assert_eq!(fx.monitor.status(), ConnectionStatus::Error);
    assert_eq!(
        fx.registry.stats(),
        RegistryStats {
            subscriptions: 1,
            listeners: 1,
            failed: 1,
            ..RegistryStats::default()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn push_notifications_reach_every_listener() {
    let transport = ScriptedTransport::failing(2);
    let fx = with_push(transport.clone(), true);
    let key = SubscriptionKey::new("groups", "u1");
    let seen_a = Arc::new(Mutex::new(Vec::new()));
    let seen_b = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    let _a = fx
        .registry
        .subscribe("groups", "u1", recording(seen_a.clone()), polling_every(1000));
    let _b = fx
        .registry
        .subscribe("groups", "u1", recording(seen_b.clone()), polling_every(1000));

    sleep(ms(6500)).await;
    assert_eq!(transport.attempt_offsets(start), vec![0, 2000, 6000]);
    assert_eq!(transport.opened(), 1);
    assert_eq!(fx.registry.mode(&key), Some(DeliveryMode::Push));
    assert_eq!(fx.monitor.channel_health(&key), Some(ChannelHealth::Live));
    assert_eq!(fx.monitor.status(), ConnectionStatus::Connected);
    assert!(!fx.engine.is_polling(&key));

    assert!(transport.sink(0).updated(Some(json!({ "id": 12 }))));
    sleep(ms(10)).await;

    for seen in [&seen_a, &seen_b] {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_update());
        assert_eq!(seen[0].key, key);
        assert_eq!(seen[0].payload, Some(json!({ "id": 12 })));
    }
}

#[tokio::test(start_paused = true)]
async fn closed_push_channel_is_reestablished() {
    let transport = ScriptedTransport::failing(0);
    let fx = with_push(transport.clone(), true);
    let key = SubscriptionKey::new("groups", "u1");

    let _handle = fx.registry.subscribe(
        "groups",
        "u1",
        counting(Arc::new(AtomicUsize::new(0))),
        polling_every(1000),
    );
    sleep(ms(10)).await;
    assert_eq!(transport.opened(), 1);

    transport.close(0);
    sleep(ms(10)).await;
    assert_eq!(transport.opened(), 2);
    assert_eq!(fx.registry.mode(&key), Some(DeliveryMode::Push));
    assert_eq!(fx.registry.attempts(&key), Some(1));
}

#[tokio::test(start_paused = true)]
async fn reconnect_signal_moves_polling_back_to_push() {
    // Four failures exhaust the budget; the fifth attempt succeeds.
    let transport = ScriptedTransport::failing(4);
    let fx = with_push(transport.clone(), true);
    let key = SubscriptionKey::new("groups", "u1");
    let calls = Arc::new(AtomicUsize::new(0));

    let _handle = fx.registry.subscribe(
        "groups",
        "u1",
        counting(calls.clone()),
        SubscribeOptions {
            max_retries: 3,
            retry_delay_ms: 100,
            fallback_to_polling: true,
            polling_interval_ms: 1000,
        },
    );

    sleep(ms(2000)).await;
    assert_eq!(fx.registry.mode(&key), Some(DeliveryMode::Polling));
    assert_eq!(fx.monitor.status(), ConnectionStatus::Error);
    let polled = calls.load(Ordering::SeqCst);
    assert!(polled >= 1);

    fx.monitor.report_network_offline();
    assert_eq!(fx.monitor.status(), ConnectionStatus::Disconnected);
    fx.monitor.report_network_online();
    sleep(ms(10)).await;

    assert_eq!(transport.opened(), 1);
    assert_eq!(fx.registry.mode(&key), Some(DeliveryMode::Push));
    assert_eq!(fx.registry.attempts(&key), Some(1));
    assert!(!fx.engine.is_polling(&key));
    assert_eq!(fx.monitor.status(), ConnectionStatus::Connected);

    sleep(ms(5000)).await;
    assert_eq!(calls.load(Ordering::SeqCst), polled);
}

#[tokio::test(start_paused = true)]
async fn establishment_waits_while_offline() {
    let transport = ScriptedTransport::failing(0);
    let fx = with_push(transport.clone(), false);
    let key = SubscriptionKey::new("groups", "u1");

    let _handle = fx.registry.subscribe(
        "groups",
        "u1",
        counting(Arc::new(AtomicUsize::new(0))),
        polling_every(1000),
    );
    sleep(ms(10_000)).await;
    assert!(transport.attempt_offsets(Instant::now()).is_empty());
    assert_eq!(fx.registry.mode(&key), Some(DeliveryMode::Establishing));
    assert_eq!(fx.monitor.status(), ConnectionStatus::Disconnected);

    fx.monitor.report_network_online();
    sleep(ms(10)).await;
    assert_eq!(transport.opened(), 1);
    assert_eq!(fx.monitor.status(), ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn cleanup_stops_everything_and_leaves_handles_inert() {
    let fx = polling_only();
    let calls = Arc::new(AtomicUsize::new(0));

    let groups = fx
        .registry
        .subscribe("groups", "u1", counting(calls.clone()), polling_every(100));
    let notifications =
        fx.registry
            .subscribe("notifications", "u1", counting(calls.clone()), polling_every(100));
    sleep(ms(150)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(fx.registry.stats().polling, 2);

    fx.registry.cleanup();
    assert!(fx.registry.active_keys().is_empty());
    assert!(fx.engine.active_keys().is_empty());
    assert_eq!(fx.registry.stats(), RegistryStats::default());
    assert!(!groups.is_active());

    sleep(ms(1000)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Releasing a handle after cleanup must not disturb a fresh subscription.
    let fresh = fx
        .registry
        .subscribe("groups", "u1", counting(calls.clone()), polling_every(100));
    drop(groups);
    drop(notifications);
    assert!(fresh.is_active());
    assert_eq!(fx.registry.ref_count(fresh.key()), 1);
}
