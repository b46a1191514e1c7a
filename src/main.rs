mod clock;
mod config;
mod dedup;
mod delivery;
mod filter;
mod format;
mod forwarder;
mod mute;
mod platform;
mod resolved;
mod scheduler;
mod topics;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dedup::DedupCache;
use crate::delivery::Delivery;
use crate::forwarder::{Forwarder, SharedDedup};
use crate::platform::telegram::{Sessions, TelegramDelivery, TelegramSource};
use crate::scheduler::tasks::register_builtin_tasks;
use crate::scheduler::Scheduler;

const EVENT_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; nothing connects until this succeeds
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let filter = config.target_filter()?;
    let timezone = config.timezone()?;
    let mute = config.mute_window()?;

    info!("Configuration loaded successfully");
    info!("  Monitored chat: {}", config.source.chat_id);
    info!("  Notification target: {}", config.delivery.chat_id);
    info!("  Target users: {}", filter.len());
    match &mute {
        Some(window) => info!("  Mute period: {}", window.describe()),
        None => info!("  Mute period: none"),
    }

    // Both identities must authenticate before serving
    let sessions = Sessions::connect(&config).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let dedup: SharedDedup = Arc::new(Mutex::new(DedupCache::new(
        config.dedup_capacity()?,
        config.dedup_retention()?,
    )));

    let source = Arc::new(TelegramSource::new(
        sessions.source.clone(),
        config.source.chat_id,
    ));
    let delivery = Delivery::new(
        Arc::new(TelegramDelivery::new(sessions.delivery.clone())),
        config.delivery.chat_id,
        config.delivery.render_mode,
    );

    if config.delivery.announce_startup {
        delivery.announce_startup().await;
    }

    let mut scheduler = Scheduler::new().await?;
    register_builtin_tasks(&scheduler, &config, dedup.clone(), clock.clone()).await?;
    scheduler.start().await?;

    let forwarder = Forwarder::new(
        filter,
        mute,
        timezone,
        dedup,
        source.clone(),
        delivery,
        clock,
    );

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let forwarder_task = tokio::spawn(forwarder.run(events_rx));

    info!("Monitor started successfully");
    let listened = source.listen(events_tx).await;

    // The listener owned the only sender; the forwarder drains and exits
    info!("Shutting down gracefully...");
    if let Err(e) = forwarder_task.await {
        error!("Forwarder task failed: {}", e);
    }
    scheduler.shutdown().await?;
    drop(sessions);

    listened
}
