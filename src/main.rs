//! shutdown-watcher: graceful shutdown watcher for cloud instances
//!
//! Long-polls the instance metadata key
//! `instance/shutdown-details/stop-state` and, once it reads
//! `PENDING_STOP`, starts the local graceful shutdown scripts:
//! - Linux: `systemctl start google-graceful-shutdown-scripts.service`
//! - Windows: `GCEMetadataScriptRunner.exe graceful-shutdown` next to this binary
//!
//! Inside a host agent the watcher is driven through `EventWatcher`; run
//! standalone, `main` drives it until it stops or a signal arrives.

mod config;
mod dispatch;
mod events;
mod lifecycle;
mod metadata;
mod watcher;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::{EventWatcher, WatcherError, RUN_SCRIPT_EVENT};
use crate::lifecycle::ShutdownSignal;
use crate::metadata::{MetadataClient, WatchKey};
use crate::watcher::{Delays, ShutdownWatcher};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "shutdown-watcher starting"
    );

    // Load configuration
    let config = Config::load()?;
    info!(metadata_url = %config.metadata_url, "configuration loaded");

    let shutdown = ShutdownSignal::new();
    shutdown.listen();

    let client = MetadataClient::new(config.metadata_url.clone(), config.watch_timeout)
        .context("failed to create metadata client")?;
    let mut watcher = ShutdownWatcher::new(
        client.watch_key(WatchKey::stop_state()),
        dispatch::platform_dispatcher(),
    )
    .with_delays(Delays::from(&config));

    drive(&mut watcher, &shutdown.token()).await;

    info!("shutdown-watcher stopped");

    Ok(())
}

/// Invoke the watcher until it asks to stop or is cancelled
async fn drive(watcher: &mut dyn EventWatcher, cancel: &CancellationToken) {
    info!(watcher = watcher.id(), events = ?watcher.events(), "watcher started");

    loop {
        match watcher.run(cancel, RUN_SCRIPT_EVENT).await {
            Ok(decision) if decision.should_continue() => continue,
            Ok(decision) => {
                info!(watcher = watcher.id(), %decision, "watcher finished");
                break;
            }
            Err(WatcherError::Cancelled) => {
                debug!(watcher = watcher.id(), "watcher cancelled");
                break;
            }
        }
    }
}
