use anyhow::Result;
use common::FetchKey;
use dashboard_api::{load_settings, DashboardService, DashboardSettings};
use data_ingestion::{CacheEvent, PollGate};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting Market Intelligence Dashboard Service");

    let path = std::env::args().nth(1).unwrap_or_else(|| "dashboard.toml".to_string());
    let settings = load_settings(&path)?;
    info!(settings = %path, upstream = %settings.ingestion.base_url, "⚙️  Settings loaded");

    let service = DashboardService::from_settings(&settings)?;

    let mut subscriptions = Vec::new();
    for view in &settings.views {
        subscriptions.push(service.subscribe_view(*view, settings.view_params.clone(), PollGate::Always));
    }
    let bot_handles: Vec<_> = settings
        .bots
        .iter()
        .map(|bot| service.subscribe_default(FetchKey::bot_status(bot)))
        .collect();

    info!(
        views = subscriptions.len(),
        bots = bot_handles.len(),
        cadences = ?service.scheduler().active_cadences(),
        "📡 Polling started"
    );

    tokio::spawn(log_cache_events(service.clone()));

    tokio::select! {
        _ = run_summaries(service.clone(), settings.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("👋 Shutting down gracefully...");
        }
    }

    for subscription in subscriptions {
        service.unsubscribe_view(subscription);
    }
    for handle in bot_handles {
        service.unsubscribe(handle);
    }
    service.shutdown();

    Ok(())
}

async fn log_cache_events(service: DashboardService) {
    let mut events = service.events();
    loop {
        match events.recv().await {
            Ok(CacheEvent::RefreshFailed { key, error }) => {
                warn!(key = %key, kind = error.kind(), "⚠️  Serving stale data: {}", error);
            }
            Ok(event) => debug!(key = %event.key(), "Cache event"),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Periodically log what each configured view currently classifies as
async fn run_summaries(service: DashboardService, settings: DashboardSettings) {
    let mut ticker = tokio::time::interval(Duration::from_secs(settings.summary_interval_secs.max(1)));
    // First tick fires immediately, before anything is cached
    ticker.tick().await;

    loop {
        ticker.tick().await;

        for view in &settings.views {
            let classified = service.classify_view(*view, &settings.view_params);
            let stale = classified.iter().filter(|c| c.signal.has_stale_inputs()).count();
            info!(view = %view, symbols = classified.len(), stale, "📊 View summary");

            for entry in classified.iter().take(5) {
                let c = &entry.classification;
                info!(
                    view = %view,
                    symbol = %c.symbol,
                    score = c.composite_score,
                    grade = %c.grade,
                    risk = %c.risk_level,
                    exit = %c.exit_window,
                    recommendation = %c.recommendation,
                    "  {}",
                    if c.requires_disclaimer() { "research only" } else { "" }
                );
            }
        }

        for bot in &settings.bots {
            match service.bot_status(bot) {
                Some(status) => info!(
                    bot = %bot,
                    enabled = status.enabled,
                    running = status.running,
                    open_positions = status.open_positions,
                    "🤖 Bot status"
                ),
                None => debug!(bot = %bot, "No bot status yet"),
            }
        }
    }
}
