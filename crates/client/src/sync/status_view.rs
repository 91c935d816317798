//! Passive connection status display.
//!
//! The view only reads: it samples the monitor and registry and hands a
//! [`StatusReport`] to a render callback when something visible changed.

use std::sync::Arc;
use std::time::Duration;

use chama_shared::ConnectionStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{ConnectionMonitor, RegistryStats, SubscriptionRegistry};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: ConnectionStatus,
    pub online: bool,
    pub stats: RegistryStats,
    pub sampled_at: DateTime<Utc>,
}

impl StatusReport {
    /// Short label for a status badge.
    pub fn label(&self) -> &'static str {
        match self.status {
            ConnectionStatus::Connected => "Live",
            ConnectionStatus::Connecting => "Connecting…",
            ConnectionStatus::Disconnected => "Offline",
            ConnectionStatus::Error => "Sync error",
        }
    }

    fn same_as(&self, other: &StatusReport) -> bool {
        self.status == other.status && self.online == other.online && self.stats == other.stats
    }
}

pub struct ConnectionStatusView {
    monitor: Arc<ConnectionMonitor>,
    registry: SubscriptionRegistry,
    task: Option<JoinHandle<()>>,
}

impl ConnectionStatusView {
    pub fn new(monitor: Arc<ConnectionMonitor>, registry: SubscriptionRegistry) -> Self {
        Self {
            monitor,
            registry,
            task: None,
        }
    }

    pub fn sample(&self) -> StatusReport {
        sample(&self.monitor, &self.registry)
    }

    /// Sample every `interval` and call `render` with each changed report.
    ///
    /// The first sample is rendered immediately. Replaces a running sampler.
    pub fn spawn<F>(&mut self, interval: Duration, render: F)
    where
        F: Fn(&StatusReport) + Send + 'static,
    {
        self.stop();
        let monitor = self.monitor.clone();
        let registry = self.registry.clone();
        let mut status_rx = monitor.watch_status();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<StatusReport> = None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = status_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }

                let report = sample(&monitor, &registry);
                if last.as_ref().is_some_and(|l| l.same_as(&report)) {
                    continue;
                }
                render(&report);
                last = Some(report);
            }
        }));
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ConnectionStatusView {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sample(monitor: &ConnectionMonitor, registry: &SubscriptionRegistry) -> StatusReport {
    StatusReport {
        status: monitor.status(),
        online: monitor.is_online(),
        stats: registry.stats(),
        sampled_at: Utc::now(),
    }
}
