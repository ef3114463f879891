//! Market metadata and account types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange-imposed minimum increments for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFilters {
    #[serde(rename = "tickSize")]
    pub tick_size: Decimal,
    #[serde(rename = "stepSize")]
    pub step_size: Decimal,
}

/// Symbol metadata needed by runners and the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub filters: SymbolFilters,
}

/// Free and locked amounts of a single asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: Decimal,
    pub locked: Decimal,
}

/// A single OHLC candle.
#[derive(Debug, Clone, Serialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn filters_round_trip_json() {
        let filters = SymbolFilters {
            tick_size: dec!(0.01),
            step_size: dec!(0.00001),
        };
        let json = serde_json::to_string(&filters).unwrap();
        let back: SymbolFilters = serde_json::from_str(&json).unwrap();
        assert_eq!(filters, back);
    }
}
