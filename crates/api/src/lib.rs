//! Admin HTTP surface: REST endpoints for the dashboard plus a
//! WebSocket that re-broadcasts every bus event.

mod routes;
mod ws;

use binance_rest::BinanceRestClient;
use bus::EventBus;
use cache::MarketCache;
use engine::{BotManager, RunnerFactory};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<BotManager>,
    pub gateway: Arc<BinanceRestClient>,
    pub cache: Arc<MarketCache>,
    pub bus: Arc<EventBus>,
    pub factory: RunnerFactory,
}

/// Serve the admin API until shutdown is signalled.
pub async fn serve(
    state: AppState,
    port: u16,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = routes::router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(port, "admin API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}
