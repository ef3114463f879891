//! Frame classification for both stream kinds.

use model::{AssetBalance, ExchangeOrderStatus, ExecutionReport, OrderSide};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

fn decimal_from_str<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse::<Decimal>().map_err(serde::de::Error::custom)
}

/// Spot `executionReport` payload (single-letter field names).
#[derive(Debug, Deserialize)]
struct SpotExecutionRaw {
    #[serde(rename = "E", default)]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    client_order_id: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "q", deserialize_with = "decimal_from_str")]
    quantity: Decimal,
    #[serde(rename = "p", deserialize_with = "decimal_from_str")]
    price: Decimal,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "i")]
    order_id: u64,
    #[serde(rename = "l", deserialize_with = "decimal_from_str")]
    last_executed_qty: Decimal,
    #[serde(rename = "z", deserialize_with = "decimal_from_str")]
    cumulative_filled_qty: Decimal,
    #[serde(rename = "L", deserialize_with = "decimal_from_str")]
    last_executed_price: Decimal,
    #[serde(rename = "T", default)]
    trade_time: i64,
    #[serde(rename = "m", default)]
    is_maker: bool,
}

impl SpotExecutionRaw {
    fn into_report(self) -> ExecutionReport {
        ExecutionReport {
            event_time_ms: self.event_time,
            symbol: self.symbol,
            order_id: self.order_id,
            client_order_id: self.client_order_id,
            side: OrderSide::from_wire(&self.side).unwrap_or(OrderSide::Buy),
            status: ExchangeOrderStatus::from_wire(&self.status)
                .unwrap_or(ExchangeOrderStatus::New),
            price: self.price,
            quantity: self.quantity,
            last_executed_qty: self.last_executed_qty,
            cumulative_filled_qty: self.cumulative_filled_qty,
            last_executed_price: self.last_executed_price,
            trade_time_ms: self.trade_time,
            is_maker: self.is_maker,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpotBalanceRaw {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "f", deserialize_with = "decimal_from_str")]
    free: Decimal,
    #[serde(rename = "l", deserialize_with = "decimal_from_str")]
    locked: Decimal,
}

impl SpotBalanceRaw {
    fn into_pair(self) -> (String, AssetBalance) {
        (
            self.asset,
            AssetBalance {
                free: self.free,
                locked: self.locked,
            },
        )
    }
}

/// Classified user-data frame.
#[derive(Debug)]
pub enum UserFrame {
    Execution(ExecutionReport, Value),
    Balances(Vec<(String, AssetBalance)>, Value),
    Other(String, Value),
}

/// Classify a user-data stream frame. Recognises both the spot and
/// the futures-style event names.
pub fn classify_user_frame(text: &str) -> Result<UserFrame, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let event = value
        .get("e")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    match event.as_str() {
        "executionReport" => {
            let raw: SpotExecutionRaw = serde_json::from_value(value.clone())?;
            Ok(UserFrame::Execution(raw.into_report(), value))
        }
        "ORDER_TRADE_UPDATE" => {
            // Futures wrapper nests the order payload under "o".
            let inner = value.get("o").cloned().unwrap_or(Value::Null);
            let mut raw: SpotExecutionRaw = serde_json::from_value(inner)?;
            if raw.event_time == 0 {
                raw.event_time = value.get("E").and_then(|v| v.as_i64()).unwrap_or(0);
            }
            Ok(UserFrame::Execution(raw.into_report(), value))
        }
        "outboundAccountPosition" => {
            let raw: Vec<SpotBalanceRaw> =
                serde_json::from_value(value.get("B").cloned().unwrap_or(Value::Null))?;
            let balances = raw.into_iter().map(SpotBalanceRaw::into_pair).collect();
            Ok(UserFrame::Balances(balances, value))
        }
        "ACCOUNT_UPDATE" => {
            let raw: Vec<SpotBalanceRaw> = serde_json::from_value(
                value
                    .pointer("/a/B")
                    .cloned()
                    .unwrap_or(Value::Array(Vec::new())),
            )?;
            let balances = raw.into_iter().map(SpotBalanceRaw::into_pair).collect();
            Ok(UserFrame::Balances(balances, value))
        }
        _ => Ok(UserFrame::Other(event, value)),
    }
}

/// Classified market-stream frame.
#[derive(Debug, PartialEq)]
pub enum MarketFrame {
    Trade {
        symbol: String,
        price: Decimal,
        ts: i64,
    },
    Kline {
        symbol: String,
        interval: String,
        close: Decimal,
        ts: i64,
        closed: bool,
    },
    Other,
}

/// Classify a market-stream frame. Accepts both raw frames and the
/// combined-stream `{"stream": …, "data": …}` envelope.
pub fn classify_market_frame(text: &str) -> Result<MarketFrame, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let data = value.get("data").unwrap_or(&value);

    match data.get("e").and_then(|v| v.as_str()) {
        Some("trade") => {
            let symbol = data
                .get("s")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let Some(price) = data
                .get("p")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
            else {
                return Ok(MarketFrame::Other);
            };
            let ts = data.get("E").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(MarketFrame::Trade { symbol, price, ts })
        }
        Some("kline") => {
            let Some(kline) = data.get("k") else {
                return Ok(MarketFrame::Other);
            };
            let Some(close) = kline
                .get("c")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
            else {
                return Ok(MarketFrame::Other);
            };

            Ok(MarketFrame::Kline {
                symbol: data
                    .get("s")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                interval: kline
                    .get("i")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                close,
                ts: data.get("E").and_then(|v| v.as_i64()).unwrap_or(0),
                closed: kline.get("x").and_then(|v| v.as_bool()).unwrap_or(false),
            })
        }
        _ => Ok(MarketFrame::Other),
    }
}
