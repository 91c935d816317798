//! Fixed-interval polling that stands in for push updates.
//!
//! The engine never fetches anything: each tick hands the callback a
//! `resource-updated` notification and the caller decides what to re-fetch.
//! A tick that fires while the previous callback is still running is
//! skipped, not queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::{lock, ChangeCallback, ChangeNotification, SubscriptionKey};

/// Shortest interval the engine accepts.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct LoopState {
    active: bool,
    in_flight: bool,
    /// Task driving the current callback, aborted on stop.
    current: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct PollLoop {
    id: u64,
    state: Mutex<LoopState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollLoop {
    /// Stop the timer and any callback that has not started running.
    fn stop(&self) -> bool {
        let (was_active, current) = {
            let mut state = lock(&self.state);
            (std::mem::replace(&mut state.active, false), state.current.take())
        };
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        if let Some(current) = current {
            current.abort();
        }
        was_active
    }
}

type ActiveLoops = Arc<Mutex<HashMap<SubscriptionKey, Arc<PollLoop>>>>;

#[derive(Debug, Default)]
pub struct PollingEngine {
    active: ActiveLoops,
    next_id: AtomicU64,
}

impl PollingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling `key` every `interval`, first tick one interval from now.
    ///
    /// A loop already running for `key` is stopped and replaced. Must be
    /// called from within a tokio runtime.
    pub fn start_polling(
        &self,
        key: SubscriptionKey,
        interval: Duration,
        callback: ChangeCallback,
    ) -> PollCancel {
        let interval = interval.max(MIN_POLL_INTERVAL);
        let poll = Arc::new(PollLoop {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(LoopState {
                active: true,
                ..LoopState::default()
            }),
            task: Mutex::new(None),
        });

        let task = tokio::spawn(run_loop(key.clone(), interval, callback, poll.clone()));
        *lock(&poll.task) = Some(task);

        if let Some(previous) = lock(&self.active).insert(key.clone(), poll.clone()) {
            tracing::warn!(key = %key, "replacing existing poll loop");
            previous.stop();
        }
        tracing::debug!(key = %key, interval_ms = interval.as_millis() as u64, "polling started");

        PollCancel {
            key,
            poll,
            active: self.active.clone(),
        }
    }

    pub fn is_polling(&self, key: &SubscriptionKey) -> bool {
        lock(&self.active).contains_key(key)
    }

    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = lock(&self.active).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Stop every loop.
    pub fn stop_all(&self) {
        let loops: Vec<_> = lock(&self.active).drain().map(|(_, poll)| poll).collect();
        for poll in loops {
            poll.stop();
        }
    }
}

async fn run_loop(
    key: SubscriptionKey,
    interval: Duration,
    callback: ChangeCallback,
    poll: Arc<PollLoop>,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        // Building the future only captures state; its body runs in the
        // spawned task, which gives up if the loop stopped before it ran.
        let pending = {
            let mut state = lock(&poll.state);
            if !state.active {
                break;
            }
            if state.in_flight {
                tracing::debug!(key = %key, "previous poll still in flight, skipping tick");
                continue;
            }
            state.in_flight = true;
            callback(ChangeNotification::updated(key.clone()))
        };

        let task = tokio::spawn({
            let poll = poll.clone();
            async move {
                if !lock(&poll.state).active {
                    return;
                }
                pending.await;
                lock(&poll.state).in_flight = false;
            }
        });
        let mut state = lock(&poll.state);
        if state.active {
            state.current = Some(task);
        } else {
            task.abort();
        }
    }
}

/// Cancellation capability for one poll loop. Dropping it cancels too.
#[derive(Debug)]
pub struct PollCancel {
    key: SubscriptionKey,
    poll: Arc<PollLoop>,
    active: ActiveLoops,
}

impl PollCancel {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Stop the loop. Safe to call more than once.
    pub fn cancel(&self) {
        {
            let mut active = lock(&self.active);
            if active.get(&self.key).is_some_and(|p| p.id == self.poll.id) {
                active.remove(&self.key);
            }
        }
        if self.poll.stop() {
            tracing::debug!(key = %self.key, "polling stopped");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        !lock(&self.poll.state).active
    }
}

impl Drop for PollCancel {
    fn drop(&mut self) {
        self.cancel();
    }
}
