//! User-data stream: execution reports and balance updates.
//!
//! Lifecycle: obtain a listen-key, hold one WebSocket session open,
//! refresh the key every 30 seconds, and on any disconnect reconnect
//! with a fresh key after an exponentially backed-off delay (1 s base).

use crate::parser::{classify_user_frame, UserFrame};
use binance_rest::BinanceRestClient;
use bus::{EventBus, OrderEvent, UserEvent};
use cache::MarketCache;
use common::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Listen-key refresh cadence.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Base delay before reconnecting a dropped stream.
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

enum SessionEnd {
    Shutdown,
    Disconnected(String),
}

/// Run the user-data stream until shutdown is signalled.
pub async fn run_user_stream(
    gateway: Arc<BinanceRestClient>,
    bus: Arc<EventBus>,
    cache: Arc<MarketCache>,
    ws_base_url: String,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff =
        ExponentialBackoff::new(RECONNECT_BASE_DELAY, Duration::from_secs(60), 0.1);

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        // Every (re)connection starts from a fresh listen-key.
        let listen_key = match gateway.create_listen_key().await {
            Ok(key) => {
                backoff.reset();
                key
            }
            Err(e) => {
                warn!(error = %e, "failed to create listen key");
                if sleep_or_shutdown(backoff.next_delay(), &mut shutdown_rx).await {
                    return;
                }
                continue;
            }
        };

        info!("user stream connecting");
        match run_session(&listen_key, &gateway, &bus, &cache, &ws_base_url, &mut shutdown_rx)
            .await
        {
            SessionEnd::Shutdown => {
                if let Err(e) = gateway.close_listen_key(&listen_key).await {
                    debug!(error = %e, "failed to close listen key on shutdown");
                }
                info!("user stream shut down");
                return;
            }
            SessionEnd::Disconnected(reason) => {
                warn!(reason = %reason, "user stream disconnected, reconnecting");
                if sleep_or_shutdown(backoff.next_delay(), &mut shutdown_rx).await {
                    return;
                }
            }
        }
    }
}

/// Sleep `delay`, returning `true` if shutdown arrived meanwhile.
async fn sleep_or_shutdown(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown_rx.changed() => *shutdown_rx.borrow(),
    }
}

async fn run_session(
    listen_key: &str,
    gateway: &Arc<BinanceRestClient>,
    bus: &Arc<EventBus>,
    cache: &Arc<MarketCache>,
    ws_base_url: &str,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let url = format!("{}/ws/{}", ws_base_url.trim_end_matches('/'), listen_key);

    let ws_stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url)).await {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => return SessionEnd::Disconnected(e.to_string()),
        Err(_) => return SessionEnd::Disconnected("connect timeout".into()),
    };

    info!("user stream connected");
    let (mut write, mut read) = ws_stream.split();

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let _ = write.close().await;
                    return SessionEnd::Shutdown;
                }
            }

            _ = keepalive.tick() => {
                if let Err(e) = gateway.keepalive_listen_key(listen_key).await {
                    // A rejected keepalive means the key is gone; force
                    // a reconnect with a fresh one. Transient failures
                    // just wait for the next tick.
                    if e.api_code().is_some() {
                        return SessionEnd::Disconnected("listen key expired".into());
                    }
                    warn!(error = %e, "listen key keepalive failed");
                } else {
                    debug!("listen key refreshed");
                }
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, bus, cache).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return SessionEnd::Disconnected("pong send failed".into());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Disconnected("closed by server".into());
                    }
                    Some(Err(e)) => {
                        return SessionEnd::Disconnected(e.to_string());
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn handle_frame(text: &str, bus: &EventBus, cache: &MarketCache) {
    match classify_user_frame(text) {
        Ok(UserFrame::Execution(report, raw)) => {
            debug!(
                symbol = %report.symbol,
                order_id = report.order_id,
                status = ?report.status,
                "execution report"
            );
            bus.publish_order(OrderEvent::execution_report(report, raw));
        }
        Ok(UserFrame::Balances(balances, raw)) => {
            debug!(assets = balances.len(), "balance update");
            cache.update_balances(balances).await;
            bus.publish_user(UserEvent {
                kind: "account_update".into(),
                raw,
            });
        }
        Ok(UserFrame::Other(kind, raw)) => {
            bus.publish_user(UserEvent { kind, raw });
        }
        Err(e) => {
            warn!(error = %e, frame = %text, "unparseable user stream frame");
        }
    }
}
