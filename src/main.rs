mod config;
mod correlator;
mod error;
mod format;
mod model;
mod platform;
mod poller;
mod relay;
mod scheduler;
mod timestamp;
mod users;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::correlator::ThreadCorrelator;
use crate::format::MessageFormatter;
use crate::platform::slack::SlackApiClient;
use crate::poller::{ChannelPoller, PollerSettings};
use crate::relay::Relay;
use crate::scheduler::Scheduler;
use crate::users::SenderNames;
use crate::webhook::EventRelay;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,slack_relay=debug".into()),
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
    info!("  Source channel: {}", config.source.channel_id);
    info!("  Target channel: {}", config.target.channel_id);
    info!(
        "  Poller: {} (every {}s)",
        if config.poller.enabled { "on" } else { "off" },
        config.poller.interval_secs
    );
    info!(
        "  Webhook: {}",
        if config.webhook.enabled { config.webhook.bind_address.as_str() } else { "off" }
    );

    let source_client = Arc::new(
        SlackApiClient::new(&config.slack, &config.source.token)
            .context("Failed to create source workspace client")?,
    );
    let target_client = Arc::new(
        SlackApiClient::new(&config.slack, &config.target.token)
            .context("Failed to create target workspace client")?,
    );

    let formatter = MessageFormatter::new(
        config.display.timezone.clone(),
        &config.display.no_text_placeholder,
    );
    let senders = Arc::new(SenderNames::new(
        source_client.clone(),
        &config.display.unknown_sender,
    ));
    let relay = Arc::new(Relay::new(
        target_client,
        Arc::new(ThreadCorrelator::new()),
        &config.target.channel_id,
    ));

    let mut poll_jobs = None;
    if config.poller.enabled {
        let poller = Arc::new(ChannelPoller::new(
            source_client.clone(),
            senders.clone(),
            formatter.clone(),
            relay.clone(),
            PollerSettings {
                source_channel: config.source.channel_id.clone(),
                history_limit: config.poller.history_limit,
                replies_limit: config.poller.replies_limit,
            },
        ));
        let jobs = Scheduler::new().await?;
        scheduler::tasks::register_poll_task(&jobs, poller, config.poller.interval()).await?;
        jobs.start().await?;
        poll_jobs = Some(jobs);
    }

    if config.webhook.enabled {
        let events = Arc::new(EventRelay::new(
            senders,
            formatter,
            relay,
            &config.source.channel_id,
            config.webhook.verification_token.clone(),
        ));
        let app = webhook::router(events, &config.webhook.path);
        let listener = tokio::net::TcpListener::bind(&config.webhook.bind_address)
            .await
            .with_context(|| format!("Failed to bind {}", config.webhook.bind_address))?;
        info!(
            "Listening for events on {}{}",
            config.webhook.bind_address, config.webhook.path
        );
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Webhook server failed")?;
    } else {
        shutdown_signal().await;
    }

    if let Some(mut jobs) = poll_jobs {
        jobs.shutdown().await?;
    }
    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
