//! WebSocket fan-out of bus events to dashboard clients.

use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Tag an event with its bus channel name: `{"type": …, …fields}`.
fn tagged<T: Serialize>(kind: &str, event: &T) -> Option<String> {
    let mut value = serde_json::to_value(event).ok()?;
    if let Value::Object(map) = &mut value {
        map.insert("type".to_string(), json!(kind));
    } else {
        value = json!({ "type": kind, "data": value });
    }
    serde_json::to_string(&value).ok()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let mut order_rx = state.bus.subscribe_order();
    let mut market_rx = state.bus.subscribe_market();
    let mut kline_rx = state.bus.subscribe_kline();
    let mut user_rx = state.bus.subscribe_user();
    let mut bot_rx = state.bus.subscribe_bot();

    debug!("websocket client connected");

    loop {
        let payload = tokio::select! {
            event = order_rx.recv() => match event {
                Ok(event) => tagged("order", &event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = market_rx.recv() => match event {
                Ok(event) => tagged("market", &event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = kline_rx.recv() => match event {
                Ok(event) => tagged("kline", &event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = user_rx.recv() => match event {
                Ok(event) => tagged("userEvent", &event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = bot_rx.recv() => match event {
                Ok(event) => tagged("bot", &event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                // Inbound frames are ignored; the socket is broadcast-only.
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            },
        };

        let Some(payload) = payload else {
            continue;
        };
        if sender.send(Message::Text(payload)).await.is_err() {
            break;
        }
    }

    debug!("websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::BotEvent;

    #[test]
    fn events_are_tagged_with_their_channel() {
        let event = BotEvent::Started { id: "b-1".into() };
        let payload = tagged("bot", &event).unwrap();
        let value: Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(value["type"], "bot");
        assert_eq!(value["event"], "started");
        assert_eq!(value["id"], "b-1");
    }
}
