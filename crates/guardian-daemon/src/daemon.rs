//! Daemon wiring: file-backed collaborators, the dry-run surface, one
//! enforcement manager, and graceful shutdown.

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::DaemonConfig;
use crate::enforcement_manager::{EnforcementManager, Trigger};
use crate::sources::{FilePolicyStore, FileUsageSource};
use crate::surface::DryRunSurface;

pub async fn run() -> Result<()> {
    let config = DaemonConfig::load()?;
    info!(child = %config.child_id, "initializing guardian daemon");

    let (trigger_tx, trigger_rx) = mpsc::unbounded_channel::<Trigger>();

    let store = Arc::new(FilePolicyStore::new(config.data.policy_path.clone()));
    let usage = Arc::new(FileUsageSource::new(
        config.data.usage_path.clone(),
        config.data.packages_path.clone(),
    ));
    let surface = Arc::new(DryRunSurface::new(trigger_tx.clone()));

    let manager =
        Arc::new(EnforcementManager::new(store, usage, surface, config.engine.clone()));
    manager.start(config.child_id).await;

    let trigger_loop = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.run(trigger_rx).await })
    };

    // Without a platform bridge feeding foreground/constraint events, a
    // periodic manual sync keeps the usage-driven decisions current.
    let sync_tick = {
        let trigger_tx = trigger_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            interval.tick().await;
            loop {
                interval.tick().await;
                if trigger_tx.send(Trigger::ManualSync).is_err() {
                    break;
                }
            }
        })
    };

    info!("daemon running, waiting for shutdown signal");
    wait_for_shutdown().await?;

    manager.stop().await;
    drop(trigger_tx);
    sync_tick.abort();
    let _ = trigger_loop.await;

    info!("daemon shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down gracefully"),
            _ = signal::ctrl_c() => info!("received Ctrl+C, shutting down gracefully"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("received Ctrl+C, shutting down gracefully");
    }

    Ok(())
}
