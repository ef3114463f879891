//! Process entry point: wiring, startup recovery and graceful
//! shutdown.
//!
//! Environment:
//! - `BINANCE_API_KEY` / `BINANCE_API_SECRET` — required
//! - `BINANCE_BASE_URL`, `BINANCE_WS_URL` — optional endpoint overrides
//! - `REDIS_URL` — optional cache mirror
//! - `SUBSCRIBE_SYMBOLS` — comma-separated, default `BTCUSDT,ETHUSDT,BTCFDUSD`
//! - `PORT` — admin API port, default 8123
//! - `DATA_DIR` — snapshot directory, default `./data`

use api::AppState;
use auth::ApiCredentials;
use binance_rest::BinanceRestClient;
use bus::EventBus;
use cache::{MarketCache, RedisMirror};
use common::Endpoints;
use engine::{default_runner_factory, BotManager, ExchangeGateway};
use std::sync::Arc;
use store::SnapshotStore;
use streams::StreamManager;
use tokio::sync::watch;
use tracing::{error, info, warn};

const DEFAULT_SYMBOLS: &str = "BTCUSDT,ETHUSDT,BTCFDUSD";
const DEFAULT_PORT: u16 = 8123;
const DEFAULT_DATA_DIR: &str = "./data";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    common::init_logging();

    // Missing credentials are fatal: nothing works unsigned.
    let credentials = match ApiCredentials::from_env() {
        Ok(credentials) => credentials,
        Err(e) => {
            error!(error = %e, "credentials missing, cannot start");
            std::process::exit(1);
        }
    };

    let endpoints = Endpoints::from_env();
    let gateway = Arc::new(BinanceRestClient::new(credentials, &endpoints)?);
    info!(base_url = %endpoints.rest_base_url, api_key = gateway.api_key(), "gateway ready");

    if let Err(e) = gateway.sync_time().await {
        warn!(error = %e, "initial time sync failed, signed requests may be rejected");
    }

    let (shutdown_tx, _) = watch::channel(false);
    let time_sync_task = gateway.spawn_time_sync(shutdown_tx.subscribe());

    let cache = match std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()) {
        Some(url) => Arc::new(MarketCache::new().with_mirror(RedisMirror::connect(&url).await)),
        None => Arc::new(MarketCache::new()),
    };

    let data_dir =
        std::env::var("DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());
    let store = Arc::new(SnapshotStore::new(&data_dir)?);
    let bus = Arc::new(EventBus::new());

    let manager = BotManager::new(
        Arc::clone(&gateway) as Arc<dyn ExchangeGateway>,
        Arc::clone(&bus),
        Arc::clone(&cache),
        Arc::clone(&store),
    );
    let factory = default_runner_factory();
    manager.load_bots_from_disk(&factory).await;

    let streams = Arc::new(StreamManager::new(
        Arc::clone(&gateway),
        Arc::clone(&bus),
        Arc::clone(&cache),
        endpoints.ws_base_url.clone(),
    ));
    streams.spawn_user_stream();

    let symbols =
        std::env::var("SUBSCRIBE_SYMBOLS").unwrap_or_else(|_| DEFAULT_SYMBOLS.to_string());
    for symbol in symbols.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        streams.spawn_market_stream(symbol, "trade");
        streams.spawn_market_stream(symbol, "kline_1m");
    }

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let api_state = AppState {
        manager: Arc::clone(&manager),
        gateway: Arc::clone(&gateway),
        cache: Arc::clone(&cache),
        bus: Arc::clone(&bus),
        factory,
    };
    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port, api_shutdown).await {
            error!(error = %e, "admin API failed");
        }
    });

    info!(symbols = %symbols, port, data_dir = %data_dir, "trading engine running");

    wait_for_signal().await;
    info!("shutdown signal received");

    // Stop bots first so their orders are canceled while the gateway
    // is still alive, then tear the plumbing down.
    manager.stop_all().await;
    streams.close_all().await;
    let _ = shutdown_tx.send(true);
    let _ = api_task.await;
    let _ = time_sync_task.await;

    info!("shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("SIGTERM handler installation cannot fail");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
