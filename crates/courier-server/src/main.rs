//! Courier - Campaign dispatch server entry point

use anyhow::{Context, Result};
use courier_api::AppState;
use courier_common::config::{Config, LoggingConfig};
use courier_core::{
    CampaignManager, ContentVariation, DispatchContext, LoggingObserver, OpenAiVariation,
    SystemClock, Transports,
};
use courier_storage::{
    CampaignRepository, ContactRepository, DatabasePool, MemoryStore, ShippingRecordRepository,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Courier dispatch server...");

    // Initialize storage
    let (ctx, db_pool) = match config.database.backend.as_str() {
        "memory" => {
            warn!("Using the in-memory store; campaigns are lost on restart");
            (DispatchContext::from_store(MemoryStore::new()), None)
        }
        _ => {
            let db_pool = DatabasePool::new(&config.database).await?;
            db_pool.migrate().await?;
            info!("Database migrations completed");

            let ctx = DispatchContext {
                campaigns: Arc::new(CampaignRepository::new(db_pool.clone())),
                ledger: Arc::new(ShippingRecordRepository::new(db_pool.clone())),
                contacts: Arc::new(ContactRepository::new(db_pool.clone())),
                transports: Transports::new(),
                variation: None,
                observer: Arc::new(LoggingObserver),
                clock: Arc::new(SystemClock),
                config: config.dispatch.clone(),
            };
            (ctx, Some(db_pool))
        }
    };

    // Channel transports
    let transports =
        Transports::from_config(&config.transport).context("Failed to configure transports")?;
    let mut ctx = ctx
        .with_transports(transports)
        .with_config(config.dispatch.clone());

    // Content variation
    if config.variation.enabled {
        let variation: Arc<dyn ContentVariation> = Arc::new(
            OpenAiVariation::new(config.variation.clone())
                .context("Failed to create variation client")?,
        );
        info!(model = %config.variation.model, "Content variation enabled");
        ctx = ctx.with_variation(variation);
    }

    let manager = Arc::new(CampaignManager::new(ctx));

    // Start supervisor: resumes SENDING campaigns and promotes due schedules
    let supervisor_handle = tokio::spawn(manager.clone().run_supervisor());

    // Start API server
    let api_handle = {
        let mut state = AppState::new(manager.clone())
            .with_webhook_secret(config.api.webhook_secret.clone());
        if let Some(db_pool) = db_pool {
            state = state.with_db_pool(db_pool);
        }
        let bind = format!("{}:{}", config.server.bind_address, config.api.port);
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .with_context(|| format!("Failed to bind API server on {}", bind))?;
        info!("Starting API server on {}", bind);

        tokio::spawn(async move {
            let app = courier_api::create_router(state);
            if let Err(e) = axum::serve(listener, app).await {
                error!("API server error: {}", e);
            }
        })
    };

    info!("Courier server started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Stop intake first, then let workers finish their in-flight sends
    api_handle.abort();
    supervisor_handle.abort();
    manager.shutdown().await;

    info!("Courier server shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
