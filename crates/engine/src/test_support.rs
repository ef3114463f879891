//! In-memory exchange and fixtures for runner tests.

use crate::bot::{Bot, StrategyKind};
use crate::config::{BotConfig, BotOptions};
use crate::gateway::ExchangeGateway;
use crate::runner::RunnerDeps;
use async_trait::async_trait;
use binance_rest::BinanceRestError;
use bus::{EventBus, OrderEvent};
use cache::MarketCache;
use model::{
    AssetBalance, ExchangeOrderStatus, ExecutionReport, NewOrderRequest, OrderSide, OrderView,
    PlacedOrder, SymbolFilters, SymbolInfo,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use store::SnapshotStore;

/// Scriptable in-memory exchange.
pub(crate) struct MockGateway {
    pub price: Mutex<Decimal>,
    pub info: Mutex<SymbolInfo>,
    /// Every placement request, in order.
    pub placed: Mutex<Vec<NewOrderRequest>>,
    /// Exchange-side open orders; placements are appended here.
    pub open: Mutex<Vec<OrderView>>,
    pub canceled: Mutex<Vec<u64>>,
    /// Results served by `query_order`; missing ids return -2013.
    pub query_results: Mutex<HashMap<u64, ExchangeOrderStatus>>,
    /// When set, every placement fails with this exchange error.
    pub fail_place: Mutex<Option<(i32, String)>>,
    pub balances: Mutex<HashMap<String, AssetBalance>>,
    next_id: AtomicU64,
}

impl MockGateway {
    pub fn btcusdt(price: Decimal) -> Arc<Self> {
        let info = SymbolInfo {
            symbol: "BTCUSDT".into(),
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
            filters: SymbolFilters {
                tick_size: dec!(0.01),
                step_size: dec!(0.00001),
            },
        };

        let balances = HashMap::from([
            (
                "BTC".to_string(),
                AssetBalance {
                    free: dec!(1000),
                    locked: Decimal::ZERO,
                },
            ),
            (
                "USDT".to_string(),
                AssetBalance {
                    free: dec!(10000000),
                    locked: Decimal::ZERO,
                },
            ),
        ]);

        Arc::new(Self {
            price: Mutex::new(price),
            info: Mutex::new(info),
            placed: Mutex::new(Vec::new()),
            open: Mutex::new(Vec::new()),
            canceled: Mutex::new(Vec::new()),
            query_results: Mutex::new(HashMap::new()),
            fail_place: Mutex::new(None),
            balances: Mutex::new(balances),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn set_info_filters(&self, tick_size: Decimal, step_size: Decimal) {
        let mut info = self.info.lock();
        info.filters = SymbolFilters {
            tick_size,
            step_size,
        };
    }

    pub fn add_open_order(
        &self,
        order_id: u64,
        client_order_id: &str,
        side: OrderSide,
        price: Decimal,
        qty: Decimal,
    ) {
        self.open.lock().push(OrderView {
            order_id,
            client_order_id: client_order_id.to_string(),
            symbol: self.info.lock().symbol.clone(),
            side,
            price,
            orig_qty: qty,
            executed_qty: Decimal::ZERO,
            status: ExchangeOrderStatus::New,
            time_ms: 0,
            update_time_ms: 0,
        });
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn price(&self, _symbol: &str) -> Result<Decimal, BinanceRestError> {
        Ok(*self.price.lock())
    }

    async fn symbol_info(&self, _symbol: &str) -> Result<SymbolInfo, BinanceRestError> {
        Ok(self.info.lock().clone())
    }

    async fn place_order(&self, req: NewOrderRequest) -> Result<PlacedOrder, BinanceRestError> {
        if let Some((code, message)) = self.fail_place.lock().clone() {
            return Err(BinanceRestError::Api { code, message });
        }

        let order_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.open.lock().push(OrderView {
            order_id,
            client_order_id: req.client_order_id.clone(),
            symbol: req.symbol.clone(),
            side: req.side,
            price: req.price.unwrap_or_default(),
            orig_qty: req.qty,
            executed_qty: Decimal::ZERO,
            status: ExchangeOrderStatus::New,
            time_ms: 0,
            update_time_ms: 0,
        });
        let client_order_id = req.client_order_id.clone();
        self.placed.lock().push(req);

        Ok(PlacedOrder {
            order_id,
            client_order_id,
            status: ExchangeOrderStatus::New,
        })
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<OrderView, BinanceRestError> {
        self.canceled.lock().push(order_id);

        let mut open = self.open.lock();
        let pos = open.iter().position(|o| o.order_id == order_id);
        match pos {
            Some(pos) => {
                let mut view = open.remove(pos);
                view.status = ExchangeOrderStatus::Canceled;
                Ok(view)
            }
            None => Ok(OrderView {
                order_id,
                client_order_id: String::new(),
                symbol: symbol.to_string(),
                side: OrderSide::Buy,
                price: Decimal::ZERO,
                orig_qty: Decimal::ZERO,
                executed_qty: Decimal::ZERO,
                status: ExchangeOrderStatus::Canceled,
                time_ms: 0,
                update_time_ms: 0,
            }),
        }
    }

    async fn query_order(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<OrderView, BinanceRestError> {
        let status = self
            .query_results
            .lock()
            .get(&order_id)
            .copied()
            .ok_or(BinanceRestError::Api {
                code: -2013,
                message: "Order does not exist.".into(),
            })?;

        Ok(OrderView {
            order_id,
            client_order_id: String::new(),
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            price: Decimal::ZERO,
            orig_qty: Decimal::ZERO,
            executed_qty: Decimal::ZERO,
            status,
            time_ms: 0,
            update_time_ms: 0,
        })
    }

    async fn open_orders(&self, _symbol: &str) -> Result<Vec<OrderView>, BinanceRestError> {
        Ok(self.open.lock().clone())
    }

    async fn balances(&self) -> Result<HashMap<String, AssetBalance>, BinanceRestError> {
        Ok(self.balances.lock().clone())
    }
}

/// Bot with a sane base config, tweaked by `customize`.
pub(crate) fn test_bot(
    strategy: StrategyKind,
    customize: impl FnOnce(&mut BotConfig),
) -> Arc<Bot> {
    let mut config = BotConfig {
        grid_levels: 2,
        grid_spread: dec!(10),
        order_size: dec!(0.001),
        take_profit: Some(dec!(5)),
        duration_minutes: 0,
        initial_start_price: None,
        options: BotOptions::default(),
    };
    customize(&mut config);

    Arc::new(Bot::create(
        "test-bot".into(),
        strategy,
        "BTCUSDT".into(),
        config,
    ))
}

/// Runner dependencies wired to the mock gateway, a fresh bus/cache
/// and a temp snapshot store; no manager.
pub(crate) fn test_deps(gateway: Arc<MockGateway>) -> RunnerDeps {
    let dir = std::env::temp_dir().join(format!("engine-test-{}", uuid::Uuid::new_v4()));

    RunnerDeps {
        gateway,
        bus: Arc::new(EventBus::new()),
        cache: Arc::new(MarketCache::new()),
        store: Arc::new(SnapshotStore::new(dir).expect("temp store")),
        manager: Weak::new(),
    }
}

/// An execution-report bus event for a fill.
pub(crate) fn fill_event(
    symbol: &str,
    order_id: u64,
    side: OrderSide,
    price: Decimal,
    qty: Decimal,
    status: ExchangeOrderStatus,
) -> OrderEvent {
    OrderEvent::execution_report(
        ExecutionReport {
            event_time_ms: 0,
            symbol: symbol.to_string(),
            order_id,
            client_order_id: String::new(),
            side,
            status,
            price,
            quantity: qty,
            last_executed_qty: qty,
            cumulative_filled_qty: qty,
            last_executed_price: price,
            trade_time_ms: 0,
            is_maker: true,
        },
        serde_json::Value::Null,
    )
}
