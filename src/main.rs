//! MemoNexus Sync
//!
//! Runs sync cycles for one device against its configured bucket, either
//! once or on a fixed interval until shut down.

use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memonexus_sync::{db, Config, SyncContext, SyncEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memonexus_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load config from env")?;

    tracing::info!("Starting MemoNexus Sync v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(device_id = %config.device.device_id, "Device");
    tracing::info!(provider = ?config.storage.provider, bucket = %config.storage.bucket, "Storage");

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    let engine = SyncEngine::from_config(&config, db_pool)
        .await
        .context("Failed to initialize sync engine")?;
    tracing::info!(path = %engine.blobs().base_path().display(), "Blob storage");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let timeout = Duration::from_secs(config.sync.timeout_secs);

    if config.sync.interval_secs == 0 {
        run_cycle(&engine, &shutdown, timeout).await?;
        return Ok(());
    }

    let mut interval = tokio::time::interval(Duration::from_secs(config.sync.interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = run_cycle(&engine, &shutdown, timeout).await {
                    if e.is_terminal() {
                        return Err(e.into());
                    }
                }
            }
        }
    }

    tracing::info!("Sync shutdown complete");
    Ok(())
}

async fn run_cycle(
    engine: &SyncEngine,
    shutdown: &CancellationToken,
    timeout: Duration,
) -> memonexus_sync::Result<()> {
    // A failed cycle takes the queue offline; each tick is a reconnect attempt
    engine.queue().set_online_status(true).await?;

    let ctx = SyncContext::with_token(shutdown.child_token()).with_timeout(timeout);
    let result = engine.sync(&ctx).await?;

    let pending = engine.pending_changes().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to count remote changes");
        engine.queue().size()
    });

    tracing::info!(
        uploaded = result.uploaded,
        downloaded = result.downloaded,
        conflicts = result.conflicts,
        pending = pending,
        "Sync finished"
    );
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
