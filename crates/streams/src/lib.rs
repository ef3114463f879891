//! WebSocket stream clients.
//!
//! Two stream kinds feed the rest of the system: the authenticated
//! user-data stream (execution reports, balance updates) and public
//! per-symbol market streams (trades, klines). Both publish onto the
//! [`bus::EventBus`] and write prices/balances into the
//! [`cache::MarketCache`]; both reconnect until shutdown is signalled.

mod market_stream;
mod parser;
mod user_stream;

pub use parser::{classify_market_frame, classify_user_frame, MarketFrame, UserFrame};

use binance_rest::BinanceRestClient;
use bus::EventBus;
use cache::MarketCache;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Owns every stream task and the shared shutdown signal.
pub struct StreamManager {
    gateway: Arc<BinanceRestClient>,
    bus: Arc<EventBus>,
    cache: Arc<MarketCache>,
    ws_base_url: String,
    shutdown_tx: watch::Sender<bool>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl StreamManager {
    pub fn new(
        gateway: Arc<BinanceRestClient>,
        bus: Arc<EventBus>,
        cache: Arc<MarketCache>,
        ws_base_url: String,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            gateway,
            bus,
            cache,
            ws_base_url,
            shutdown_tx,
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Start the user-data stream task.
    pub fn spawn_user_stream(&self) {
        let gateway = Arc::clone(&self.gateway);
        let bus = Arc::clone(&self.bus);
        let cache = Arc::clone(&self.cache);
        let ws_base = self.ws_base_url.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            user_stream::run_user_stream(gateway, bus, cache, ws_base, shutdown_rx).await;
        });
        self.handles.lock().push(handle);
    }

    /// Start one market stream for `(symbol, stream_type)`, e.g.
    /// `("BTCUSDT", "trade")` or `("BTCUSDT", "kline_1m")`.
    pub fn spawn_market_stream(&self, symbol: &str, stream_type: &str) {
        let bus = Arc::clone(&self.bus);
        let cache = Arc::clone(&self.cache);
        let url = market_stream::stream_url(&self.ws_base_url, symbol, stream_type);
        let symbol = symbol.to_uppercase();
        let stream_type = stream_type.to_string();
        let shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            market_stream::run_market_stream(url, symbol, stream_type, bus, cache, shutdown_rx)
                .await;
        });
        self.handles.lock().push(handle);
    }

    /// Stop every stream: cancels keepalive timers, closes sockets and
    /// suppresses further reconnection.
    pub async fn close_all(&self) {
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("all streams closed");
    }
}
