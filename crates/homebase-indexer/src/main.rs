use anyhow::{Context as _, Result};
use clap::Parser;
use homebase_common::store::{DocumentStore, MemoryStore, PgDocumentStore};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod abi;
mod bootstrap;
mod chain;
mod config;
mod contracts;
mod dedup;
mod dispatch;
mod indexer;
mod reconcilers;
mod registry;
#[cfg(test)]
mod testing;

use chain::{AlloyChain, ChainSource};
use config::{Mode, StoreBackend};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "homebase_indexer=info,sqlx=warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_cli(config::Cli::parse())?;

    tracing::info!(
        "Starting Homebase indexer on {:?} for {:?} ({:?} mode)",
        config.network,
        config.app,
        config.mode
    );

    let store: Arc<dyn DocumentStore> = match config.store {
        StoreBackend::Postgres => {
            let url = config.database_url.as_deref().unwrap_or_default();
            let pool = homebase_common::db::create_pool(url, config.pool)
                .await
                .context("Failed to connect to the database")?;

            tracing::info!("Running database migrations");
            homebase_common::db::run_migrations(&pool).await?;
            Arc::new(PgDocumentStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store, nothing will be persisted");
            if !config.roots.has_homebase() && config.roots.will_factory.is_none() {
                tracing::warn!("No root addresses given; pass --wrapper, --wrapper-w or --will-factory");
            }
            Arc::new(MemoryStore::new())
        }
    };

    let chain = AlloyChain::new(&config.rpc_url, config.rpc_requests_per_second)?;
    let head = chain
        .block_number()
        .await
        .with_context(|| format!("Node {} is not reachable", config.rpc_url))?;
    tracing::info!("Connected to {} at block {}", config.rpc_url, head);
    let chain: Arc<dyn ChainSource> = Arc::new(chain);

    let registry = bootstrap::build_registry(store.as_ref(), &config).await?;

    let table = dispatch::EventTable::new();
    for (topic, event) in table.iter() {
        tracing::info!("Monitoring {} {} ({})", event, event.signature(), topic);
    }
    tracing::info!("Listening for events on {} addresses", registry.watched());

    let ctx = Arc::new(reconcilers::Context::new(
        chain,
        store,
        config.profile.daos_collection,
        config.profile.wills_collection,
    ));
    let indexer = indexer::Indexer::new(
        ctx,
        Arc::new(Mutex::new(registry)),
        table,
        config.block_window,
        config.poll_interval,
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let workers = config.workers;
    let run = match config.mode {
        Mode::Pipeline => tokio::spawn(indexer.run_pipeline(workers, stop_rx)),
        Mode::Sequential => tokio::spawn(indexer.run_sequential(stop_rx)),
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested, waiting for the current work to finish");
    stop_tx.send(true).ok();
    run.await.context("Indexer task failed")?;

    tracing::info!("Homebase indexer stopped");
    Ok(())
}
