//! Exchange REST gateway.

use crate::error::BinanceRestError;
use crate::responses::{
    kline_from_row, AccountInfoResponse, ExchangeInfoResponse, ListenKeyResponse, NewOrderAck,
    PriceTickerResponse, RawOrder, ServerTimeResponse,
};
use auth::{ApiCredentials, RequestSigner};
use common::{epoch_ms, retry_with_backoff, Endpoints, RetryPolicy};
use model::{
    AssetBalance, ExchangeOrderStatus, Kline, NewOrderRequest, OrderView, PlacedOrder, SymbolInfo,
};
use rest_client::RestClient;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How often the server-time offset is refreshed.
const TIME_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Request timeout for all gateway calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Copy)]
enum SignedMethod {
    Get,
    Post,
    Delete,
}

/// Signed REST client with time-offset tracking and uniform retries.
pub struct BinanceRestClient {
    http: RestClient,
    credentials: ApiCredentials,
    /// `server_time - local_time` estimate; added to the local clock
    /// when stamping signed requests.
    time_offset_ms: AtomicI64,
    retry: RetryPolicy,
}

impl BinanceRestClient {
    pub fn new(
        credentials: ApiCredentials,
        endpoints: &Endpoints,
    ) -> Result<Self, BinanceRestError> {
        let http = RestClient::new(&endpoints.rest_base_url, REQUEST_TIMEOUT)?;

        Ok(Self {
            http,
            credentials,
            time_offset_ms: AtomicI64::new(0),
            retry: RetryPolicy::default(),
        })
    }

    pub fn api_key(&self) -> &str {
        self.credentials.api_key()
    }

    /// Current offset between the exchange clock and the local clock.
    pub fn time_offset_ms(&self) -> i64 {
        self.time_offset_ms.load(Ordering::Relaxed)
    }

    /// Timestamp to stamp on signed requests.
    pub fn timestamp_ms(&self) -> i64 {
        epoch_ms() + self.time_offset_ms()
    }

    // ------------------------------------------------------------------
    // Time synchronisation
    // ------------------------------------------------------------------

    /// Sample the server clock and refresh the shared offset:
    /// `offset = server_time - (after_local - rtt / 2)`.
    pub async fn sync_time(&self) -> Result<(), BinanceRestError> {
        let started = std::time::Instant::now();
        let response: ServerTimeResponse = self.public_get("/api/v3/time", None).await?;
        let rtt_ms = started.elapsed().as_millis() as i64;
        let after_local = epoch_ms();

        let offset = response.server_time - (after_local - rtt_ms / 2);
        self.time_offset_ms.store(offset, Ordering::Relaxed);

        tracing::debug!(
            server_time = response.server_time,
            offset_ms = offset,
            rtt_ms,
            "synchronised server time"
        );

        Ok(())
    }

    /// Keep the time offset fresh until shutdown is signalled.
    pub fn spawn_time_sync(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TIME_SYNC_INTERVAL);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = client.sync_time().await {
                            tracing::warn!(error = %e, "server time sync failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Public market data
    // ------------------------------------------------------------------

    pub async fn get_server_time(&self) -> Result<i64, BinanceRestError> {
        let response: ServerTimeResponse = self.public_get("/api/v3/time", None).await?;
        Ok(response.server_time)
    }

    pub async fn get_price(&self, symbol: &str) -> Result<Decimal, BinanceRestError> {
        let query = format!("symbol={symbol}");
        let ticker: PriceTickerResponse = self
            .public_get("/api/v3/ticker/price", Some(&query))
            .await?;
        Ok(ticker.price)
    }

    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Kline>, BinanceRestError> {
        let query = format!("symbol={symbol}&interval={interval}&limit={limit}");
        let rows: Vec<Vec<serde_json::Value>> =
            self.public_get("/api/v3/klines", Some(&query)).await?;

        Ok(rows.iter().filter_map(|row| kline_from_row(row)).collect())
    }

    /// Symbol metadata including tick/step filters.
    pub async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BinanceRestError> {
        let query = format!("symbol={symbol}");
        let info: ExchangeInfoResponse = self
            .public_get("/api/v3/exchangeInfo", Some(&query))
            .await?;

        info.symbols
            .into_iter()
            .next()
            .map(|s| s.into_info())
            .ok_or_else(|| BinanceRestError::Parse(format!("symbol {symbol} not in exchangeInfo")))
    }

    // ------------------------------------------------------------------
    // Signed trading operations
    // ------------------------------------------------------------------

    pub async fn new_order(&self, req: &NewOrderRequest) -> Result<PlacedOrder, BinanceRestError> {
        let mut params: Vec<(&str, String)> = vec![
            ("symbol", req.symbol.clone()),
            ("side", req.side.as_wire().to_string()),
            ("type", req.kind.as_wire().to_string()),
            ("quantity", req.qty.to_string()),
            ("newClientOrderId", req.client_order_id.clone()),
        ];

        if let Some(price) = req.price {
            params.push(("price", price.to_string()));
        }
        if let Some(tif) = req.time_in_force {
            params.push(("timeInForce", tif.as_wire().to_string()));
        }

        tracing::info!(
            symbol = %req.symbol,
            side = req.side.as_wire(),
            kind = req.kind.as_wire(),
            qty = %req.qty,
            price = ?req.price,
            client_order_id = %req.client_order_id,
            "placing order"
        );

        let ack: NewOrderAck = self
            .signed(SignedMethod::Post, "/api/v3/order", &params)
            .await?;

        Ok(PlacedOrder {
            order_id: ack.order_id,
            client_order_id: ack.client_order_id,
            status: ExchangeOrderStatus::from_wire(&ack.status)
                .unwrap_or(ExchangeOrderStatus::New),
        })
    }

    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<OrderView, BinanceRestError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];

        let raw: RawOrder = self
            .signed(SignedMethod::Delete, "/api/v3/order", &params)
            .await?;
        Ok(raw.into_view())
    }

    /// Cancel every open order on the symbol, this bot's or not.
    pub async fn cancel_all_orders(&self, symbol: &str) -> Result<(), BinanceRestError> {
        let params = [("symbol", symbol.to_string())];
        let _: Vec<RawOrder> = self
            .signed(SignedMethod::Delete, "/api/v3/openOrders", &params)
            .await?;
        Ok(())
    }

    pub async fn get_order(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<OrderView, BinanceRestError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];

        let raw: RawOrder = self
            .signed(SignedMethod::Get, "/api/v3/order", &params)
            .await?;
        Ok(raw.into_view())
    }

    pub async fn get_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<OrderView>, BinanceRestError> {
        let params: Vec<(&str, String)> = match symbol {
            Some(s) => vec![("symbol", s.to_string())],
            None => Vec::new(),
        };

        let raw: Vec<RawOrder> = self
            .signed(SignedMethod::Get, "/api/v3/openOrders", &params)
            .await?;
        Ok(raw.into_iter().map(RawOrder::into_view).collect())
    }

    pub async fn get_all_orders(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<Vec<OrderView>, BinanceRestError> {
        let mut params = vec![("symbol", symbol.to_string())];
        if let Some(limit) = limit {
            params.push(("limit", limit.to_string()));
        }

        let raw: Vec<RawOrder> = self
            .signed(SignedMethod::Get, "/api/v3/allOrders", &params)
            .await?;
        Ok(raw.into_iter().map(RawOrder::into_view).collect())
    }

    pub async fn account_balances(
        &self,
    ) -> Result<HashMap<String, AssetBalance>, BinanceRestError> {
        let info: AccountInfoResponse = self
            .signed(SignedMethod::Get, "/api/v3/account", &[])
            .await?;

        Ok(info
            .balances
            .into_iter()
            .map(|b| b.into_pair())
            .collect())
    }

    // ------------------------------------------------------------------
    // User-data-stream listen keys
    // ------------------------------------------------------------------

    pub async fn create_listen_key(&self) -> Result<String, BinanceRestError> {
        let headers = [("X-MBX-APIKEY", self.credentials.api_key())];
        let response: ListenKeyResponse = self
            .http
            .post("/api/v3/userDataStream", None, Some(&headers))
            .await
            .map_err(BinanceRestError::from_rest)?;

        Ok(response.listen_key)
    }

    pub async fn keepalive_listen_key(&self, listen_key: &str) -> Result<(), BinanceRestError> {
        let headers = [("X-MBX-APIKEY", self.credentials.api_key())];
        let query = format!("listenKey={listen_key}");

        self.http
            .put_empty("/api/v3/userDataStream", Some(&query), Some(&headers))
            .await
            .map_err(BinanceRestError::from_rest)
    }

    pub async fn close_listen_key(&self, listen_key: &str) -> Result<(), BinanceRestError> {
        let headers = [("X-MBX-APIKEY", self.credentials.api_key())];
        let query = format!("listenKey={listen_key}");

        self.http
            .delete_empty("/api/v3/userDataStream", Some(&query), Some(&headers))
            .await
            .map_err(BinanceRestError::from_rest)
    }

    // ------------------------------------------------------------------
    // Transport helpers
    // ------------------------------------------------------------------

    async fn public_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&str>,
    ) -> Result<T, BinanceRestError> {
        retry_with_backoff(
            self.retry,
            path,
            BinanceRestError::is_retryable,
            move || async move {
                self.http
                    .get(path, query, None)
                    .await
                    .map_err(BinanceRestError::from_rest)
            },
        )
        .await
    }

    /// Signed request; the timestamp and signature are regenerated on
    /// every retry attempt so a delayed retry is never rejected for a
    /// stale timestamp.
    async fn signed<T: serde::de::DeserializeOwned>(
        &self,
        method: SignedMethod,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, BinanceRestError> {
        retry_with_backoff(
            self.retry,
            path,
            BinanceRestError::is_retryable,
            move || async move {
                let signer = RequestSigner::new(&self.credentials);
                let query = signer.signed_query(params, self.timestamp_ms());
                let headers = [("X-MBX-APIKEY", self.credentials.api_key())];

                let result = match method {
                    SignedMethod::Get => self.http.get(path, Some(&query), Some(&headers)).await,
                    SignedMethod::Post => self.http.post(path, Some(&query), Some(&headers)).await,
                    SignedMethod::Delete => {
                        self.http.delete(path, Some(&query), Some(&headers)).await
                    }
                };

                result.map_err(BinanceRestError::from_rest)
            },
        )
        .await
    }
}

impl std::fmt::Debug for BinanceRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceRestClient")
            .field("base_url", &self.http.base_url())
            .field("api_key", &self.credentials.api_key())
            .field("time_offset_ms", &self.time_offset_ms())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> BinanceRestClient {
        let creds = ApiCredentials::new("key".into(), "secret".into());
        BinanceRestClient::new(creds, &Endpoints::default()).expect("client builds")
    }

    #[test]
    fn timestamp_applies_offset() {
        let client = test_client();
        client.time_offset_ms.store(5_000, Ordering::Relaxed);

        let now = epoch_ms();
        let stamped = client.timestamp_ms();
        assert!(stamped - now >= 4_900, "offset not applied: {}", stamped - now);
    }

    #[test]
    fn offset_defaults_to_zero() {
        let client = test_client();
        assert_eq!(client.time_offset_ms(), 0);
    }
}
