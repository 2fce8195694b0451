//! # CGN - card lifecycle service
//!
//! ## Startup Sequence
//!
//! 1. **Configuration** - defaults, optional TOML file, `CGN_*` overrides
//! 2. **Stores** - process-local or SurrealDB, per `storage.url`. Cards,
//!    expiration records, and backups live next to the instances so a
//!    restart resumes against the same data
//! 3. **Lifecycle service** - engine, activities, orchestrations
//! 4. **Resume** - every instance left live by the previous process
//! 5. **Purge loop** - drops finished instances past retention
//! 6. **Axum API** - until Ctrl+C

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod cli;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cgn_core::{load_config, Config, SurrealBackupStore, SurrealCardStore, SurrealExpirationStore};
use cgn_lifecycle::{engine_config, Collaborators, LifecycleService, LifecycleSettings};
use cgn_workflow::{InMemoryInstanceStore, InstanceStore, SurrealInstanceStore, SurrealStoreConfig};

use crate::cli::{Cli, Commands};

const DEFAULT_FILTER: &str = "info,cgn=debug,cgn_workflow=debug,tower_http=debug";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    let (store, collaborators) = init_stores(&config).await?;
    let service = init_service(&config, store, collaborators);

    match cli.command {
        Commands::Serve => serve(&config, service).await,
        Commands::Purge => {
            let purged = service
                .engine()
                .purge_expired(retention(&config))
                .await
                .context("Purge failed")?;
            info!(purged, "Purge finished");
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Instance store and the collaborators that must survive with it.
async fn init_stores(config: &Config) -> Result<(Arc<dyn InstanceStore>, Collaborators)> {
    if config.storage.url == "memory" {
        info!("Using process-local stores");
        return Ok((Arc::new(InMemoryInstanceStore::new()), Collaborators::in_memory()));
    }

    let surreal = SurrealStoreConfig {
        url: config.storage.url.clone(),
        namespace: config.storage.namespace.clone(),
        database: config.storage.database.clone(),
    };
    let store = SurrealInstanceStore::connect(&surreal)
        .await
        .with_context(|| format!("Failed to connect to SurrealDB at {}", surreal.url))?;
    info!(url = %surreal.url, "SurrealDB stores connected");

    let db = store.client();
    let collaborators = Collaborators {
        cards: Arc::new(SurrealCardStore::new(Arc::clone(&db))),
        expirations: Arc::new(SurrealExpirationStore::new(Arc::clone(&db))),
        backups: Arc::new(SurrealBackupStore::new(db)),
        ..Collaborators::in_memory()
    };
    Ok((Arc::new(store), collaborators))
}

fn init_service(config: &Config, store: Arc<dyn InstanceStore>, collaborators: Collaborators) -> LifecycleService {
    LifecycleService::builder()
        .store(store)
        .collaborators(collaborators)
        .settings(LifecycleSettings::from_engine_settings(&config.engine))
        .engine_config(engine_config(config))
        .build()
}

fn retention(config: &Config) -> Duration {
    Duration::from_secs(config.engine.retention_hours.saturating_mul(3600))
}

async fn serve(config: &Config, service: LifecycleService) -> Result<()> {
    let start_time = Instant::now();

    let resumed = service.resume().await.context("Failed to resume instances")?;
    info!(resumed, "Resumed pending instances");

    tokio::spawn(purge_loop(
        service.clone(),
        retention(config),
        Duration::from_secs(config.engine.purge_interval_secs.max(1)),
    ));

    let addr = cgn_web::parse_bind(&config.server.bind)?;
    info!("CGN started in {:?}", start_time.elapsed());

    tokio::select! {
        served = cgn_web::run_server(addr, service) => served.context("HTTP server failed")?,
        () = wait_for_shutdown() => {}
    }

    info!("CGN stopped");
    Ok(())
}

async fn purge_loop(service: LifecycleService, retention: Duration, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if let Err(e) = service.engine().purge_expired(retention).await {
            error!(error = %e, "Purge failed");
        }
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
