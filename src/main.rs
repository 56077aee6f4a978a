mod config;
mod context;
mod dispatcher;
mod handlers;
mod i18n;
mod platform;
mod router;
mod scheduler;
mod store;
mod tracker;
mod webhook;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::dispatcher::DispatchEngine;
use crate::i18n::Translator;
use crate::platform::telegram::TelegramClient;
use crate::router::CommandRegistry;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::tracker::UserTracker;
use crate::worker::BatchProcessor;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tg_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Bot: {}", config.bot.name);
    info!("  Webhook: {}{}", config.server.bind, config.server.webhook_path);
    info!("  Database: {}", config.storage.database_path.display());
    info!(
        "  Debounce: {}s ({} reads)",
        config.tracking.debounce_window_secs, config.tracking.read_consistency
    );

    // Long-lived clients, shared by every batch
    let store = Store::open(&config.storage.database_path)?;
    let outbound = Arc::new(TelegramClient::new(&config.telegram, config.http.timeout())?);
    let translator = Arc::new(Translator::new(&config.bot));

    let mut registry = CommandRegistry::new();
    handlers::register_handlers(&mut registry, translator.clone());
    info!("Dispatcher ready with commands: {:?}", registry.commands());

    let tracker = UserTracker::new(
        Arc::new(store.clone()),
        &config.tracking,
        config.http.timeout(),
    );
    let engine = Arc::new(DispatchEngine::new(
        registry,
        tracker,
        outbound,
        (*translator).clone(),
    ));

    // Claims left behind by a previous run are redelivered right away
    let released = store.release_expired(i64::MAX).await?;
    if released > 0 {
        warn!("Re-queued {} update(s) claimed by a previous run", released);
    }

    let mut scheduler = Scheduler::new().await?;
    crate::scheduler::tasks::register_builtin_tasks(&scheduler, store.clone()).await?;
    scheduler.start().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(worker::run(
        store.clone(),
        BatchProcessor::new(engine),
        config.queue.clone(),
        shutdown_rx,
    ));

    let app = webhook::router(
        webhook::WebhookState::new(store, config.telegram.webhook_secret.clone()),
        &config.server.webhook_path,
    );
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    info!("Relay is listening on {}", config.server.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown requested");
        })
        .await
        .context("Server error")?;

    shutdown_tx.send(true).ok();
    worker.await.context("Worker task panicked")?;
    scheduler.shutdown().await?;

    Ok(())
}
