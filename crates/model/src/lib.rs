//! Shared domain types: orders, execution reports, balances, symbol
//! metadata.

mod market;
mod order;
mod report;

pub use market::{AssetBalance, Kline, SymbolFilters, SymbolInfo};
pub use order::{
    ExchangeOrderStatus, LocalOrder, LocalOrderStatus, NewOrderRequest, OrderKind, OrderSide,
    OrderView, PlacedOrder, TimeInForce,
};
pub use report::ExecutionReport;
