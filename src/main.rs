//! SRA Leaderboard Server
//!
//! Connects to the simulation's telemetry relay, keeps the live standings
//! and streams them to overlay subscribers.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sra_leaderboard::{
    config::AppConfig,
    enrichment::{EnrichmentCache, LfsApiCatalog, VehicleCatalog},
    leaderboard::{LeaderboardEngine, LeaderboardRunner},
    network::{LeaderboardServer, SnapshotPublisher, SubscriberHub},
    telemetry::{SessionControl, TelemetryRelay},
    VERSION,
};

/// Telemetry events buffered between the relay and the engine.
const EVENT_QUEUE: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("SRA Leaderboard Server v{}", VERSION);

    let config = AppConfig::from_env().context("reading configuration")?;

    let catalog: Option<Arc<dyn VehicleCatalog>> = match &config.catalog {
        Some(credentials) => {
            let catalog = LfsApiCatalog::new(
                credentials.client_id.clone(),
                credentials.client_secret.clone(),
                config.lookup_timeout(),
            )
            .context("building metadata client")?;
            info!("Vehicle metadata service enabled");
            Some(Arc::new(catalog))
        }
        None => {
            warn!("LFS_CLIENT_ID / LFS_CLIENT_SECRET not set, using local vehicle images only");
            None
        }
    };

    let (shutdown_tx, _) = broadcast::channel(1);
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

    let (relay, relay_handle) = TelemetryRelay::new(config.relay.clone(), events_tx);
    let control: Arc<dyn SessionControl> = Arc::new(relay_handle);

    let hub = Arc::new(SubscriberHub::new());
    let engine = LeaderboardEngine::new(
        config.engine.clone(),
        EnrichmentCache::new(catalog, config.lookup_timeout()),
    );
    let publisher = SnapshotPublisher::new(hub.clone(), config.engine.publish_interval_ms);
    let runner = LeaderboardRunner::new(engine, publisher, control.clone());

    let relay_task = tokio::spawn(relay.run(shutdown_tx.subscribe()));
    let runner_task = tokio::spawn(runner.run(events_rx, shutdown_tx.subscribe()));

    let server = LeaderboardServer::new(config.server.clone(), hub, control, shutdown_tx.clone());

    tokio::select! {
        result = server.run() => result.context("leaderboard server")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            server.shutdown();
        }
    }

    let _ = shutdown_tx.send(());
    let _ = relay_task.await;
    let _ = runner_task.await;
    info!("Stopped");
    Ok(())
}
