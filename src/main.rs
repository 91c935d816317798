//! Chama - headless client shell
//!
//! Owns the sync runtime, mounts the resource pollers for the configured
//! user and logs connection status and snapshot changes until Ctrl-C.

use anyhow::Context;
use chama_client::sync::{ResourcePoller, SnapshotSource, StatusReport};
use chama_client::{SyncConfig, SyncRuntime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chama=info,chama_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SyncConfig::from_env();
    let user_id = std::env::var("CHAMA_USER_ID")
        .ok()
        .filter(|id| !id.trim().is_empty());
    if user_id.is_none() {
        tracing::warn!("CHAMA_USER_ID not set, pollers stay idle");
    }

    let runtime = SyncRuntime::new(config);
    runtime.mount(user_id.as_deref());

    let mut status_view = runtime.status_view();
    status_view.spawn(runtime.config().status_sample_interval, render_status);

    let loggers = [
        spawn_snapshot_logger(runtime.contributions()),
        spawn_snapshot_logger(runtime.groups()),
        spawn_snapshot_logger(runtime.notifications()),
    ];

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");

    status_view.stop();
    for logger in loggers {
        logger.abort();
    }
    runtime.shutdown();
    Ok(())
}

fn render_status(report: &StatusReport) {
    tracing::info!(
        status = %report.status,
        online = report.online,
        subscriptions = report.stats.subscriptions,
        push = report.stats.push,
        polling = report.stats.polling,
        "{}",
        report.label()
    );
}

fn spawn_snapshot_logger<S: SnapshotSource>(
    poller: &ResourcePoller<S>,
) -> tokio::task::JoinHandle<()> {
    let resource = poller.resource();
    let mut rx = poller.watch();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            match &snapshot.last_error {
                Some(error) => tracing::warn!(
                    resource,
                    phase = ?snapshot.phase,
                    items = snapshot.items.len(),
                    error = %error,
                    "snapshot stale"
                ),
                None => tracing::info!(
                    resource,
                    phase = ?snapshot.phase,
                    items = snapshot.items.len(),
                    generation = snapshot.generation,
                    "snapshot updated"
                ),
            }
        }
    })
}
