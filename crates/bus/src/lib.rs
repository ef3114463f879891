//! In-process event bus.
//!
//! One broadcast channel per event kind. Within a kind, subscribers
//! see events in publish order; a slow or failed subscriber never
//! blocks the publisher or its peers (lagging receivers drop the
//! oldest events instead).

use model::ExecutionReport;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Order-update event from the user-data stream.
#[derive(Debug, Clone, Serialize)]
pub struct OrderEvent {
    pub event: &'static str,
    pub report: ExecutionReport,
    /// Original frame, for observers that want exchange-native fields.
    pub raw: serde_json::Value,
}

impl OrderEvent {
    pub fn execution_report(report: ExecutionReport, raw: serde_json::Value) -> Self {
        Self {
            event: "execution_report",
            report,
            raw,
        }
    }
}

/// Price tick from a market stream.
#[derive(Debug, Clone, Serialize)]
pub struct MarketEvent {
    pub symbol: String,
    pub price: Decimal,
    pub ts: i64,
    /// Stream that produced the tick, e.g. `trade` or `kline_1m`.
    pub stream: String,
}

/// Candle update from a kline stream.
#[derive(Debug, Clone, Serialize)]
pub struct KlineEvent {
    pub symbol: String,
    pub interval: String,
    pub close: Decimal,
    pub ts: i64,
    /// Whether the candle is closed.
    pub closed: bool,
}

/// Non-order frame from the user-data stream.
#[derive(Debug, Clone, Serialize)]
pub struct UserEvent {
    pub kind: String,
    pub raw: serde_json::Value,
}

/// Bot lifecycle notifications.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BotEvent {
    Created {
        id: String,
        name: String,
        strategy: String,
        symbol: String,
    },
    Started {
        id: String,
    },
    Stopped {
        id: String,
    },
    BotError {
        id: String,
        code: Option<i32>,
        message: String,
    },
    Removed {
        id: String,
    },
}

/// Fan-out hub shared by streams, runners and the admin surface.
pub struct EventBus {
    order_tx: broadcast::Sender<OrderEvent>,
    market_tx: broadcast::Sender<MarketEvent>,
    kline_tx: broadcast::Sender<KlineEvent>,
    user_tx: broadcast::Sender<UserEvent>,
    bot_tx: broadcast::Sender<BotEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order_tx: broadcast::channel(capacity).0,
            market_tx: broadcast::channel(capacity).0,
            kline_tx: broadcast::channel(capacity).0,
            user_tx: broadcast::channel(capacity).0,
            bot_tx: broadcast::channel(capacity).0,
        }
    }

    // Publishing with no subscribers is a no-op, not an error.

    pub fn publish_order(&self, event: OrderEvent) {
        let _ = self.order_tx.send(event);
    }

    pub fn publish_market(&self, event: MarketEvent) {
        let _ = self.market_tx.send(event);
    }

    pub fn publish_kline(&self, event: KlineEvent) {
        let _ = self.kline_tx.send(event);
    }

    pub fn publish_user(&self, event: UserEvent) {
        let _ = self.user_tx.send(event);
    }

    pub fn publish_bot(&self, event: BotEvent) {
        let _ = self.bot_tx.send(event);
    }

    pub fn subscribe_order(&self) -> broadcast::Receiver<OrderEvent> {
        self.order_tx.subscribe()
    }

    pub fn subscribe_market(&self) -> broadcast::Receiver<MarketEvent> {
        self.market_tx.subscribe()
    }

    pub fn subscribe_kline(&self) -> broadcast::Receiver<KlineEvent> {
        self.kline_tx.subscribe()
    }

    pub fn subscribe_user(&self) -> broadcast::Receiver<UserEvent> {
        self.user_tx.subscribe()
    }

    pub fn subscribe_bot(&self) -> broadcast::Receiver<BotEvent> {
        self.bot_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{ExchangeOrderStatus, OrderSide};
    use rust_decimal_macros::dec;

    fn report(order_id: u64) -> ExecutionReport {
        ExecutionReport {
            event_time_ms: 1,
            symbol: "BTCUSDT".into(),
            order_id,
            client_order_id: format!("tag-{order_id}"),
            side: OrderSide::Buy,
            status: ExchangeOrderStatus::Filled,
            price: dec!(29990),
            quantity: dec!(0.001),
            last_executed_qty: dec!(0.001),
            cumulative_filled_qty: dec!(0.001),
            last_executed_price: dec!(29990),
            trade_time_ms: 1,
            is_maker: true,
        }
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_order();

        for id in 1..=3 {
            bus.publish_order(OrderEvent::execution_report(
                report(id),
                serde_json::Value::Null,
            ));
        }

        for expected in 1..=3 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.report.order_id, expected);
        }
    }

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe_order();
        let mut rx_b = bus.subscribe_order();

        bus.publish_order(OrderEvent::execution_report(
            report(9),
            serde_json::Value::Null,
        ));

        assert_eq!(rx_a.recv().await.unwrap().report.order_id, 9);
        assert_eq!(rx_b.recv().await.unwrap().report.order_id, 9);
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish_bot(BotEvent::Started { id: "b-1".into() });
        bus.publish_market(MarketEvent {
            symbol: "BTCUSDT".into(),
            price: dec!(30000),
            ts: 0,
            stream: "trade".into(),
        });
    }

    #[test]
    fn bot_events_serialize_tagged() {
        let event = BotEvent::BotError {
            id: "b-1".into(),
            code: Some(-2015),
            message: "Invalid API-key".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "bot_error");
        assert_eq!(json["code"], -2015);
    }
}
