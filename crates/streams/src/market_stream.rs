//! Public market streams: one connection per `(symbol, stream_type)`.

use crate::parser::{classify_market_frame, MarketFrame};
use bus::{EventBus, KlineEvent, MarketEvent};
use cache::MarketCache;
use common::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the single-stream URL, e.g.
/// `wss://…/ws/btcusdt@kline_1m`.
pub(crate) fn stream_url(ws_base_url: &str, symbol: &str, stream_type: &str) -> String {
    format!(
        "{}/ws/{}@{}",
        ws_base_url.trim_end_matches('/'),
        symbol.to_lowercase(),
        stream_type
    )
}

/// Run one market stream with reconnection until shutdown.
pub async fn run_market_stream(
    url: String,
    symbol: String,
    stream_type: String,
    bus: Arc<EventBus>,
    cache: Arc<MarketCache>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = ExponentialBackoff::default();

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let clean_shutdown =
            run_session(&url, &symbol, &stream_type, &bus, &cache, &mut shutdown_rx).await;
        if clean_shutdown {
            info!(symbol = %symbol, stream = %stream_type, "market stream shut down");
            return;
        }

        let delay = backoff.next_delay();
        warn!(
            symbol = %symbol,
            stream = %stream_type,
            delay_secs = delay.as_secs_f64(),
            "market stream disconnected, reconnecting"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}

/// Returns `true` on clean shutdown, `false` on disconnect.
async fn run_session(
    url: &str,
    symbol: &str,
    stream_type: &str,
    bus: &EventBus,
    cache: &MarketCache,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    let ws_stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url)).await {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            warn!(symbol, stream = stream_type, error = %e, "market stream connect failed");
            return false;
        }
        Err(_) => {
            warn!(symbol, stream = stream_type, "market stream connect timeout");
            return false;
        }
    };

    info!(symbol, stream = stream_type, "market stream connected");
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let _ = write.close().await;
                    return true;
                }
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, stream_type, bus, cache).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return false;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return false,
                    Some(Err(e)) => {
                        warn!(symbol, error = %e, "market stream error");
                        return false;
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn handle_frame(text: &str, stream_type: &str, bus: &EventBus, cache: &MarketCache) {
    match classify_market_frame(text) {
        Ok(MarketFrame::Trade { symbol, price, ts }) => {
            cache.set_price(&symbol, price, ts).await;
            bus.publish_market(MarketEvent {
                symbol,
                price,
                ts,
                stream: stream_type.to_string(),
            });
        }
        Ok(MarketFrame::Kline {
            symbol,
            interval,
            close,
            ts,
            closed,
        }) => {
            cache.set_price(&symbol, close, ts).await;
            bus.publish_market(MarketEvent {
                symbol: symbol.clone(),
                price: close,
                ts,
                stream: stream_type.to_string(),
            });
            bus.publish_kline(KlineEvent {
                symbol,
                interval,
                close,
                ts,
                closed,
            });
        }
        Ok(MarketFrame::Other) => {}
        Err(e) => {
            warn!(error = %e, frame = %text, "unparseable market stream frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_single_stream_urls() {
        assert_eq!(
            stream_url("wss://stream.binance.com:9443", "BTCUSDT", "trade"),
            "wss://stream.binance.com:9443/ws/btcusdt@trade"
        );
        assert_eq!(
            stream_url("wss://stream.binance.com:9443/", "ethusdt", "kline_1m"),
            "wss://stream.binance.com:9443/ws/ethusdt@kline_1m"
        );
    }
}
