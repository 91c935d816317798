//! Wiring of the sync core, owned by the application root.

use std::sync::Arc;

use crate::api_client::ApiClient;
use crate::capability::CapabilityRegistry;
use crate::config::SyncConfig;
use crate::resources::{ContributionsSource, GroupsSource, NotificationsSource};
use crate::sync::{
    ConnectionMonitor, ConnectionStatusView, PollerOptions, PollingEngine, PushTransport,
    ResourcePoller, SubscriptionRegistry, WsPushTransport,
};

/// One explicitly constructed instance of every sync component.
///
/// Consumers get shared references from here instead of reaching for
/// globals. Dropping the runtime (or calling [`SyncRuntime::shutdown`])
/// stops every timer it started.
pub struct SyncRuntime {
    config: SyncConfig,
    monitor: Arc<ConnectionMonitor>,
    engine: Arc<PollingEngine>,
    registry: SubscriptionRegistry,
    api: ApiClient,
    contributions: ResourcePoller<ContributionsSource>,
    groups: ResourcePoller<GroupsSource>,
    notifications: ResourcePoller<NotificationsSource>,
}

impl SyncRuntime {
    /// Build from config; push goes over WebSocket when `push_url` is set.
    pub fn new(config: SyncConfig) -> Self {
        let transport = config.push_url.as_ref().map(|url| {
            Arc::new(WsPushTransport::new(url.clone(), config.api_token.clone()))
                as Arc<dyn PushTransport>
        });
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: SyncConfig, transport: Option<Arc<dyn PushTransport>>) -> Self {
        let monitor = Arc::new(ConnectionMonitor::new());
        let engine = Arc::new(PollingEngine::new());
        let registry =
            SubscriptionRegistry::with_transport(monitor.clone(), engine.clone(), transport);

        let capabilities = Arc::new(CapabilityRegistry::new(config.capability_ttl));
        let api = ApiClient::new(capabilities)
            .with_base_url(config.api_url.clone())
            .with_token(config.api_token.clone());

        let options = PollerOptions {
            grace: config.poll_grace,
            subscribe: config.subscribe_options(),
        };
        let contributions = ResourcePoller::new(
            ContributionsSource::new(api.clone()).with_limit(config.transaction_limit),
            registry.clone(),
            options.clone(),
        );
        let groups = ResourcePoller::new(
            GroupsSource::new(api.clone()),
            registry.clone(),
            options.clone(),
        );
        let notifications = ResourcePoller::new(
            NotificationsSource::new(api.clone()),
            registry.clone(),
            options,
        );

        tracing::info!(
            api_url = %config.api_url,
            push = config.push_url.is_some(),
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "sync runtime created"
        );

        Self {
            config,
            monitor,
            engine,
            registry,
            api,
            contributions,
            groups,
            notifications,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    pub fn engine(&self) -> &Arc<PollingEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn contributions(&self) -> &ResourcePoller<ContributionsSource> {
        &self.contributions
    }

    pub fn groups(&self) -> &ResourcePoller<GroupsSource> {
        &self.groups
    }

    pub fn notifications(&self) -> &ResourcePoller<NotificationsSource> {
        &self.notifications
    }

    /// Mount every poller for `user_id`; `None` sends them all idle.
    pub fn mount(&self, user_id: Option<&str>) {
        self.contributions.mount(user_id);
        self.groups.mount(user_id);
        self.notifications.mount(user_id);
    }

    pub fn status_view(&self) -> ConnectionStatusView {
        ConnectionStatusView::new(self.monitor.clone(), self.registry.clone())
    }

    /// Unmount every poller and stop all subscriptions. Idempotent.
    pub fn shutdown(&self) {
        self.contributions.unmount();
        self.groups.unmount();
        self.notifications.unmount();
        self.registry.cleanup();
        self.api.capabilities().clear();
        tracing::info!("sync runtime shut down");
    }
}

impl Drop for SyncRuntime {
    fn drop(&mut self) {
        self.registry.cleanup();
    }
}
