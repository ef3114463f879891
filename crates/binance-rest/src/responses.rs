//! Raw exchange response shapes and their conversions into model types.

use model::{AssetBalance, ExchangeOrderStatus, Kline, OrderSide, OrderView, SymbolInfo};
use model::SymbolFilters;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

pub(crate) fn decimal_from_str<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse::<Decimal>().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerTimeResponse {
    #[serde(rename = "serverTime")]
    pub server_time: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    pub listen_key: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PriceTickerResponse {
    #[allow(dead_code)]
    pub symbol: String,
    #[serde(deserialize_with = "decimal_from_str")]
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NewOrderAck {
    #[serde(rename = "orderId")]
    pub order_id: u64,
    #[serde(rename = "clientOrderId")]
    pub client_order_id: String,
    pub status: String,
}

/// Order shape shared by order-query, cancel, open-orders and
/// all-orders responses.
#[derive(Debug, Deserialize)]
pub(crate) struct RawOrder {
    pub symbol: String,
    #[serde(rename = "orderId")]
    pub order_id: u64,
    #[serde(rename = "clientOrderId", default)]
    pub client_order_id: String,
    /// Cancel responses use `origClientOrderId` instead.
    #[serde(rename = "origClientOrderId", default)]
    pub orig_client_order_id: String,
    #[serde(deserialize_with = "decimal_from_str")]
    pub price: Decimal,
    #[serde(rename = "origQty", deserialize_with = "decimal_from_str")]
    pub orig_qty: Decimal,
    #[serde(rename = "executedQty", deserialize_with = "decimal_from_str")]
    pub executed_qty: Decimal,
    pub status: String,
    pub side: String,
    #[serde(default)]
    pub time: i64,
    #[serde(rename = "updateTime", default)]
    pub update_time: i64,
}

impl RawOrder {
    pub fn into_view(self) -> OrderView {
        let client_order_id = if self.client_order_id.is_empty() {
            self.orig_client_order_id
        } else {
            self.client_order_id
        };

        OrderView {
            order_id: self.order_id,
            client_order_id,
            symbol: self.symbol,
            side: OrderSide::from_wire(&self.side).unwrap_or(OrderSide::Buy),
            price: self.price,
            orig_qty: self.orig_qty,
            executed_qty: self.executed_qty,
            status: ExchangeOrderStatus::from_wire(&self.status).unwrap_or(ExchangeOrderStatus::New),
            time_ms: self.time,
            update_time_ms: self.update_time,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AccountInfoResponse {
    pub balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBalance {
    pub asset: String,
    #[serde(deserialize_with = "decimal_from_str")]
    pub free: Decimal,
    #[serde(deserialize_with = "decimal_from_str")]
    pub locked: Decimal,
}

impl RawBalance {
    pub fn into_pair(self) -> (String, AssetBalance) {
        (
            self.asset,
            AssetBalance {
                free: self.free,
                locked: self.locked,
            },
        )
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExchangeInfoResponse {
    pub symbols: Vec<RawSymbol>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawSymbol {
    pub symbol: String,
    #[serde(rename = "baseAsset")]
    pub base_asset: String,
    #[serde(rename = "quoteAsset")]
    pub quote_asset: String,
    pub filters: Vec<RawFilter>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawFilter {
    #[serde(rename = "filterType")]
    pub filter_type: String,
    #[serde(rename = "tickSize", default)]
    pub tick_size: Option<String>,
    #[serde(rename = "stepSize", default)]
    pub step_size: Option<String>,
}

impl RawSymbol {
    /// Extract tick/step sizes from the `PRICE_FILTER` and `LOT_SIZE`
    /// filter entries. Missing filters fall back to zero, which the
    /// rounding helpers treat as "no constraint".
    pub fn into_info(self) -> SymbolInfo {
        let mut tick_size = Decimal::ZERO;
        let mut step_size = Decimal::ZERO;

        for filter in &self.filters {
            match filter.filter_type.as_str() {
                "PRICE_FILTER" => {
                    if let Some(tick) = filter.tick_size.as_deref().and_then(|s| s.parse().ok()) {
                        tick_size = tick;
                    }
                }
                "LOT_SIZE" => {
                    if let Some(step) = filter.step_size.as_deref().and_then(|s| s.parse().ok()) {
                        step_size = step;
                    }
                }
                _ => {}
            }
        }

        SymbolInfo {
            symbol: self.symbol,
            base_asset: self.base_asset,
            quote_asset: self.quote_asset,
            filters: SymbolFilters {
                tick_size,
                step_size,
            },
        }
    }
}

/// Klines arrive as positional arrays; pull out the OHLCV fields.
pub(crate) fn kline_from_row(row: &[serde_json::Value]) -> Option<Kline> {
    fn dec(v: &serde_json::Value) -> Option<Decimal> {
        v.as_str()?.parse().ok()
    }

    Some(Kline {
        open_time: row.first()?.as_i64()?,
        open: dec(row.get(1)?)?,
        high: dec(row.get(2)?)?,
        low: dec(row.get(3)?)?,
        close: dec(row.get(4)?)?,
        volume: dec(row.get(5)?)?,
        close_time: row.get(6)?.as_i64()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_price_ticker() {
        let json = r#"{"symbol":"BTCUSDT","price":"30000.50"}"#;
        let ticker: PriceTickerResponse = serde_json::from_str(json).unwrap();
        assert_eq!(ticker.price, dec!(30000.50));
    }

    #[test]
    fn raw_order_normalises_to_view() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "orderId": 42,
            "clientOrderId": "abc-1-b-ff00",
            "price": "29990.00",
            "origQty": "0.00100000",
            "executedQty": "0.00000000",
            "status": "NEW",
            "side": "BUY",
            "time": 1700000000000,
            "updateTime": 1700000000000
        }"#;

        let view = serde_json::from_str::<RawOrder>(json).unwrap().into_view();
        assert_eq!(view.order_id, 42);
        assert_eq!(view.side, OrderSide::Buy);
        assert_eq!(view.status, ExchangeOrderStatus::New);
        assert_eq!(view.price, dec!(29990.00));
        assert_eq!(view.time_ms, 1700000000000);
    }

    #[test]
    fn cancel_response_uses_orig_client_order_id() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "orderId": 7,
            "origClientOrderId": "abc-1-s-0001",
            "price": "30010.00",
            "origQty": "0.00100000",
            "executedQty": "0.00000000",
            "status": "CANCELED",
            "side": "SELL"
        }"#;

        let view = serde_json::from_str::<RawOrder>(json).unwrap().into_view();
        assert_eq!(view.client_order_id, "abc-1-s-0001");
        assert_eq!(view.status, ExchangeOrderStatus::Canceled);
    }

    #[test]
    fn extracts_filters_from_exchange_info() {
        let json = r#"{
            "symbols": [{
                "symbol": "BTCUSDT",
                "baseAsset": "BTC",
                "quoteAsset": "USDT",
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "0.01", "tickSize": "0.01"},
                    {"filterType": "LOT_SIZE", "minQty": "0.00001", "stepSize": "0.00001"},
                    {"filterType": "NOTIONAL", "minNotional": "5.0"}
                ]
            }]
        }"#;

        let info: ExchangeInfoResponse = serde_json::from_str(json).unwrap();
        let symbol = info.symbols.into_iter().next().unwrap().into_info();
        assert_eq!(symbol.base_asset, "BTC");
        assert_eq!(symbol.quote_asset, "USDT");
        assert_eq!(symbol.filters.tick_size, dec!(0.01));
        assert_eq!(symbol.filters.step_size, dec!(0.00001));
    }

    #[test]
    fn parses_kline_rows() {
        let json = r#"[
            [1700000000000, "30000.0", "30100.0", "29900.0", "30050.0", "12.5", 1700000059999, "x", 1, "y", "z", "0"]
        ]"#;
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(json).unwrap();
        let kline = kline_from_row(&rows[0]).unwrap();
        assert_eq!(kline.open, dec!(30000.0));
        assert_eq!(kline.close, dec!(30050.0));
        assert_eq!(kline.close_time, 1700000059999);
    }

    #[test]
    fn balances_convert_to_map_pairs() {
        let json = r#"{"asset":"BTC","free":"1.5","locked":"0.5"}"#;
        let raw: RawBalance = serde_json::from_str(json).unwrap();
        let (asset, balance) = raw.into_pair();
        assert_eq!(asset, "BTC");
        assert_eq!(balance.free, dec!(1.5));
        assert_eq!(balance.locked, dec!(0.5));
    }
}
