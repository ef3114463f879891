//! The exchange seam used by runners and the manager.
//!
//! Strategy code talks to the exchange only through this trait, which
//! keeps the runners testable against an in-memory exchange.

use async_trait::async_trait;
use binance_rest::{BinanceRestClient, BinanceRestError};
use model::{AssetBalance, NewOrderRequest, OrderView, PlacedOrder, SymbolInfo};
use rust_decimal::Decimal;
use std::collections::HashMap;

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn price(&self, symbol: &str) -> Result<Decimal, BinanceRestError>;

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BinanceRestError>;

    async fn place_order(&self, req: NewOrderRequest) -> Result<PlacedOrder, BinanceRestError>;

    async fn cancel_order(&self, symbol: &str, order_id: u64)
        -> Result<OrderView, BinanceRestError>;

    async fn query_order(&self, symbol: &str, order_id: u64)
        -> Result<OrderView, BinanceRestError>;

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderView>, BinanceRestError>;

    async fn balances(&self) -> Result<HashMap<String, AssetBalance>, BinanceRestError>;
}

#[async_trait]
impl ExchangeGateway for BinanceRestClient {
    async fn price(&self, symbol: &str) -> Result<Decimal, BinanceRestError> {
        self.get_price(symbol).await
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BinanceRestError> {
        self.get_symbol_info(symbol).await
    }

    async fn place_order(&self, req: NewOrderRequest) -> Result<PlacedOrder, BinanceRestError> {
        self.new_order(&req).await
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<OrderView, BinanceRestError> {
        BinanceRestClient::cancel_order(self, symbol, order_id).await
    }

    async fn query_order(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<OrderView, BinanceRestError> {
        self.get_order(symbol, order_id).await
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OrderView>, BinanceRestError> {
        self.get_open_orders(Some(symbol)).await
    }

    async fn balances(&self) -> Result<HashMap<String, AssetBalance>, BinanceRestError> {
        self.account_balances().await
    }
}
