use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use polysentry::api::create_router;
use polysentry::config::{AppConfig, SourceMode, StoreBackend};
use polysentry::enrichment::{EnrichmentClient, RateLimiter};
use polysentry::ingestion::{
    run_trade_monitor, run_trade_poller, FeedActivity, FeedEvent, Forwarder, SourceError,
    TradeMonitor, WsEventSource,
};
use polysentry::intelligence::Trackers;
use polysentry::polymarket::{DataClient, GammaClient};
use polysentry::services::market_discovery::run_market_discovery;
use polysentry::services::{
    load_all, run_persistence, run_verifier, save_all, LogNotifier, NotifierSet, TelegramNotifier,
};
use polysentry::store::{FileStore, PgStore, SnapshotStore};
use polysentry::AppState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let config = AppConfig::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);
    let detection = config.detection.clone();

    let metrics_handle = polysentry::metrics::init_metrics();

    // --- Snapshot store ---
    let store: Arc<dyn SnapshotStore> = match &config.store {
        StoreBackend::Postgres(url) => {
            tracing::info!("Connecting to snapshot database...");
            Arc::new(PgStore::connect(url).await?)
        }
        StoreBackend::File(dir) => {
            tracing::info!(dir = %dir, "Using file snapshot store");
            Arc::new(FileStore::open(dir).await?)
        }
    };

    // --- Tracker state ---
    let trackers = Trackers::from_config(&detection);
    let persistables = trackers.persistables();
    load_all(&persistables, store.as_ref()).await;

    // --- Notifiers ---
    let mut notifiers = NotifierSet::new().with(Arc::new(LogNotifier));
    if let (Some(token), Some(chat)) = (
        config.telegram_bot_token.clone(),
        config.telegram_chat_id.clone(),
    ) {
        notifiers = notifiers.with(Arc::new(TelegramNotifier::new(token, chat)));
        tracing::info!("Telegram notifications enabled");
    } else {
        tracing::info!("Telegram not configured, alerts go to the log only");
    }

    // --- Enrichment ---
    let http = reqwest::Client::new();
    let data_client = DataClient::with_base_url(http.clone(), &config.data_api_url);
    let enrichment: Arc<dyn EnrichmentClient> = Arc::new(data_client.clone());
    let limiter = Arc::new(RateLimiter::per_minute(detection.engine.rate_limit_per_minute));

    let monitor = Arc::new(TradeMonitor::new(
        detection.clone(),
        enrichment,
        limiter,
        trackers.clone(),
        notifiers.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    // --- Event source ---
    let (events_rx, feed, stream) = match config.source_mode {
        SourceMode::Stream => {
            if config.ws_subscribe_token_ids.is_empty() && !config.market_discovery_enabled {
                tracing::warn!(
                    "WS_SUBSCRIBE_TOKEN_IDS is empty and discovery is off; the stream will carry no trades"
                );
            }
            tracing::warn!(
                url = %config.polymarket_ws_url,
                "Stream mode: trades without a wallet address are filtered; use EVENT_SOURCE=poll for the public market channel"
            );
            let (source, events_rx, errors_rx) = WsEventSource::spawn(
                config.polymarket_ws_url.clone(),
                config.ws_subscribe_token_ids.clone(),
                detection.engine.queue_capacity,
            );
            tasks.spawn(log_source_errors(errors_rx));
            (events_rx, source.activity(), Some(source))
        }
        SourceMode::Poll => {
            let (forwarder, events_rx) =
                Forwarder::<FeedEvent>::channel(detection.engine.queue_capacity, "poll");
            let feed = Arc::new(FeedActivity::default());
            tasks.spawn(run_trade_poller(
                data_client.clone(),
                forwarder,
                feed.clone(),
                config.poll_interval_secs,
                config.poll_limit,
                shutdown_rx.clone(),
            ));
            (events_rx, feed, None)
        }
    };
    tracing::info!(mode = ?config.source_mode, "Event source started");

    if let (Some(source), true) = (stream.clone(), config.market_discovery_enabled) {
        tasks.spawn(run_market_discovery(
            GammaClient::new(),
            source,
            config.market_discovery_interval_secs,
            config.market_min_volume,
            config.market_min_liquidity,
            shutdown_rx.clone(),
        ));
    }

    // --- Monitor, verifiers, persistence ---
    tasks.spawn(run_trade_monitor(
        monitor.clone(),
        events_rx,
        shutdown_rx.clone(),
    ));

    let ctx = monitor.verify_context();
    for verifier in trackers.verifiers() {
        tasks.spawn(run_verifier(
            verifier,
            ctx.clone(),
            notifiers.clone(),
            detection.engine.verify_interval_secs,
            shutdown_rx.clone(),
        ));
    }

    tasks.spawn(run_persistence(
        persistables.clone(),
        store.clone(),
        detection.engine.save_interval_secs,
        shutdown_rx.clone(),
    ));

    // --- HTTP ---
    let state = AppState {
        trackers: trackers.clone(),
        feed,
        health_stale_secs: config.health_stale_secs,
        started_at: chrono::Utc::now(),
        metrics_handle,
    };
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");

    let mut http_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.changed().await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Some(source) = &stream {
        source.close();
    }

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(grace = ?SHUTDOWN_GRACE, "Tasks still running after grace period, aborting");
        tasks.abort_all();
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server error"),
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task failed"),
        Err(_) => tracing::warn!("HTTP server did not stop within grace period"),
        Ok(Ok(Ok(()))) => {}
    }

    let saved = save_all(&persistables, store.as_ref()).await;
    tracing::info!(saved, total = persistables.len(), "Final snapshot saved, exiting");

    Ok(())
}

async fn log_source_errors(mut errors: mpsc::Receiver<SourceError>) {
    while let Some(e) = errors.recv().await {
        match e {
            SourceError::Frame(_) => tracing::debug!(error = %e, "Event source frame error"),
            _ => tracing::warn!(error = %e, "Event source error"),
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
