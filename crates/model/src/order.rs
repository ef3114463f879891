//! Order types shared between the gateway, streams and runners.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    /// Single-character tag used in client order ids.
    pub fn tag(&self) -> char {
        match self {
            Self::Buy => 'b',
            Self::Sell => 's',
        }
    }
}

/// Order type subset this engine places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    /// Post-only limit; rejected by the exchange if it would take.
    LimitMaker,
    Market,
}

impl OrderKind {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Limit => "LIMIT",
            Self::LimitMaker => "LIMIT_MAKER",
            Self::Market => "MARKET",
        }
    }
}

/// Time in force for plain limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

impl TimeInForce {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Gtc => "GTC",
            Self::Ioc => "IOC",
            Self::Fok => "FOK",
        }
    }
}

/// Order status as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    PendingCancel,
}

impl ExchangeOrderStatus {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(Self::New),
            "PARTIALLY_FILLED" => Some(Self::PartiallyFilled),
            "FILLED" => Some(Self::Filled),
            "CANCELED" => Some(Self::Canceled),
            "REJECTED" => Some(Self::Rejected),
            "EXPIRED" => Some(Self::Expired),
            "PENDING_CANCEL" => Some(Self::PendingCancel),
            _ => None,
        }
    }

    /// Fully or partially executed.
    pub fn is_fill(&self) -> bool {
        matches!(self, Self::Filled | Self::PartiallyFilled)
    }

    /// No further transitions possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }

    /// Still resting on the book.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled | Self::PendingCancel)
    }
}

/// Lifecycle of an order as tracked by a strategy runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalOrderStatus {
    /// Submitted, no exchange acknowledgment yet.
    Pending,
    /// Resting on the exchange.
    Open,
    Filled,
    /// Skipped because the account balance could not cover it.
    IgnoredBalance,
    /// Placement failed for a non-balance reason.
    Error,
}

/// An order as tracked locally by a runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalOrder {
    #[serde(rename = "orderId")]
    pub order_id: u64,
    #[serde(rename = "clientOrderId")]
    pub client_order_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub qty: Decimal,
    pub status: LocalOrderStatus,
}

/// Normalised view of an exchange-side order (open-order and
/// order-query results).
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub order_id: u64,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub status: ExchangeOrderStatus,
    pub time_ms: i64,
    pub update_time_ms: i64,
}

/// Parameters for placing an order.
#[derive(Debug, Clone)]
pub struct NewOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub client_order_id: String,
}

impl NewOrderRequest {
    /// Post-only limit order, the default for grid levels.
    pub fn limit_maker(
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        price: Decimal,
        client_order_id: String,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::LimitMaker,
            qty,
            price: Some(price),
            time_in_force: None,
            client_order_id,
        }
    }

    /// Plain GTC limit order.
    pub fn limit(
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        price: Decimal,
        client_order_id: String,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Limit,
            qty,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
            client_order_id,
        }
    }
}

/// Acknowledgment returned by the exchange for a new order.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: u64,
    pub client_order_id: String,
    pub status: ExchangeOrderStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_round_trips_through_wire_form() {
        assert_eq!(OrderSide::from_wire("BUY"), Some(OrderSide::Buy));
        assert_eq!(OrderSide::from_wire("SELL"), Some(OrderSide::Sell));
        assert_eq!(OrderSide::from_wire("HOLD"), None);
        assert_eq!(OrderSide::Buy.as_wire(), "BUY");
    }

    #[test]
    fn fill_statuses() {
        assert!(ExchangeOrderStatus::Filled.is_fill());
        assert!(ExchangeOrderStatus::PartiallyFilled.is_fill());
        assert!(!ExchangeOrderStatus::New.is_fill());
        assert!(!ExchangeOrderStatus::Canceled.is_fill());
    }

    #[test]
    fn terminal_statuses() {
        for status in [
            ExchangeOrderStatus::Filled,
            ExchangeOrderStatus::Canceled,
            ExchangeOrderStatus::Rejected,
            ExchangeOrderStatus::Expired,
        ] {
            assert!(status.is_terminal());
            assert!(!status.is_active() || status.is_fill());
        }
        assert!(!ExchangeOrderStatus::New.is_terminal());
    }

    #[test]
    fn local_status_serializes_snake_case() {
        let json = serde_json::to_string(&LocalOrderStatus::IgnoredBalance).unwrap();
        assert_eq!(json, "\"ignored_balance\"");
    }
}
