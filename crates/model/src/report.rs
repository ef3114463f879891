//! Execution reports delivered by the user-data stream.

use crate::order::{ExchangeOrderStatus, OrderSide};
use rust_decimal::Decimal;
use serde::Serialize;

/// Normalised order-update event.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub event_time_ms: i64,
    pub symbol: String,
    pub order_id: u64,
    pub client_order_id: String,
    pub side: OrderSide,
    pub status: ExchangeOrderStatus,
    /// Original order price.
    pub price: Decimal,
    /// Original order quantity.
    pub quantity: Decimal,
    pub last_executed_qty: Decimal,
    pub cumulative_filled_qty: Decimal,
    pub last_executed_price: Decimal,
    pub trade_time_ms: i64,
    pub is_maker: bool,
}
