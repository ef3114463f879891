//! Runner trait, shared dependencies and the common placement policy.

use crate::bot::Bot;
use crate::errors::{classify, BenignKind, EngineError, ErrorClass};
use crate::gateway::ExchangeGateway;
use crate::manager::BotManager;
use crate::util::new_client_order_id;
use async_trait::async_trait;
use bus::EventBus;
use cache::MarketCache;
use model::{LocalOrder, LocalOrderStatus, NewOrderRequest, OrderKind, OrderSide, TimeInForce};
use rust_decimal::Decimal;
use std::sync::{Arc, Weak};
use std::time::Duration;
use store::SnapshotStore;
use tracing::warn;

/// Wait before the single retry after a filter rejection (price moved
/// while the order was in flight).
const FILTER_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Everything a runner needs besides its bot.
#[derive(Clone)]
pub struct RunnerDeps {
    pub gateway: Arc<dyn ExchangeGateway>,
    pub bus: Arc<EventBus>,
    pub cache: Arc<MarketCache>,
    pub store: Arc<SnapshotStore>,
    /// Back-reference for stats updates and stop requests; weak so the
    /// runner never keeps the manager alive.
    pub manager: Weak<BotManager>,
}

/// The capability surface the manager holds for each bot.
#[async_trait]
pub trait BotRunner: Send + Sync {
    /// Begin trading. Fatal exchange errors surface to the caller;
    /// anything recoverable is handled internally.
    async fn start(&self) -> Result<(), EngineError>;

    /// Stop trading and cancel this bot's open orders on the exchange.
    async fn stop(&self);

    /// Strategy-specific state for the admin surface.
    fn details(&self) -> serde_json::Value;
}

pub type RunnerFactory = Arc<dyn Fn(Arc<Bot>, RunnerDeps) -> Arc<dyn BotRunner> + Send + Sync>;

/// Factory producing the runner matching each bot's strategy.
pub fn default_runner_factory() -> RunnerFactory {
    Arc::new(|bot, deps| -> Arc<dyn BotRunner> {
        match bot.strategy {
            crate::bot::StrategyKind::Grid => crate::grid::GridRunner::new(bot, deps),
            crate::bot::StrategyKind::DcaBuy => crate::dca_buy::DcaBuyRunner::new(bot, deps),
            crate::bot::StrategyKind::DcaSell => crate::dca_sell::DcaSellRunner::new(bot, deps),
        }
    })
}

/// Place one order under the shared error policy:
/// -2010 → record as `ignored_balance` and move on; -1013 → wait and
/// retry once with a fresh client id; fatal codes propagate; anything
/// else → record as `error`.
pub(crate) async fn place_with_policy(
    gateway: &Arc<dyn ExchangeGateway>,
    bot: &Bot,
    kind: OrderKind,
    side: OrderSide,
    price: Decimal,
    qty: Decimal,
) -> Result<LocalOrder, EngineError> {
    let mut retried_filter = false;

    loop {
        let client_order_id = new_client_order_id(&bot.bot_tag, side);
        let request = NewOrderRequest {
            symbol: bot.symbol.clone(),
            side,
            kind,
            qty,
            price: Some(price),
            time_in_force: match kind {
                OrderKind::Limit => Some(TimeInForce::Gtc),
                _ => None,
            },
            client_order_id: client_order_id.clone(),
        };

        match gateway.place_order(request).await {
            Ok(ack) => {
                return Ok(LocalOrder {
                    order_id: ack.order_id,
                    client_order_id: ack.client_order_id,
                    side,
                    price,
                    qty,
                    status: LocalOrderStatus::Open,
                });
            }
            Err(err) => match classify(&err) {
                ErrorClass::Benign(BenignKind::InsufficientBalance) => {
                    warn!(bot = %bot.id, side = side.as_wire(), %price, "insufficient balance, skipping level");
                    return Ok(LocalOrder {
                        order_id: 0,
                        client_order_id,
                        side,
                        price,
                        qty,
                        status: LocalOrderStatus::IgnoredBalance,
                    });
                }
                ErrorClass::Benign(BenignKind::FilterFailure) if !retried_filter => {
                    warn!(bot = %bot.id, %price, "filter rejection, retrying once");
                    tokio::time::sleep(FILTER_RETRY_DELAY).await;
                    retried_filter = true;
                }
                ErrorClass::FatalToBot => return Err(err.into()),
                _ => {
                    warn!(bot = %bot.id, side = side.as_wire(), %price, error = %err, "order placement failed");
                    return Ok(LocalOrder {
                        order_id: 0,
                        client_order_id,
                        side,
                        price,
                        qty,
                        status: LocalOrderStatus::Error,
                    });
                }
            },
        }
    }
}

/// Cancel an order, tolerating "already gone".
pub(crate) async fn cancel_quietly(
    gateway: &Arc<dyn ExchangeGateway>,
    bot: &Bot,
    order_id: u64,
) {
    if let Err(err) = gateway.cancel_order(&bot.symbol, order_id).await {
        match classify(&err) {
            ErrorClass::Benign(BenignKind::UnknownOrder) => {}
            _ => warn!(bot = %bot.id, order_id, error = %err, "cancel failed"),
        }
    }
}

/// Handle an error escaping a runner's event loop. Fatal errors are
/// published as a `bot_error` event exactly once and a graceful stop
/// is requested through the manager; the return value tells the loop
/// to exit. Non-fatal errors are logged and the loop continues.
pub(crate) fn handle_loop_error(
    deps: &RunnerDeps,
    bot: &Bot,
    context: &str,
    err: &EngineError,
) -> bool {
    let Some(code) = crate::errors::fatal_code(err) else {
        warn!(bot = %bot.id, context, error = %err, "runner error");
        return false;
    };

    tracing::error!(bot = %bot.id, context, code, error = %err, "fatal error, stopping bot");
    deps.bus.publish_bot(bus::BotEvent::BotError {
        id: bot.id.clone(),
        code: Some(code),
        message: err.to_string(),
    });

    if let Some(manager) = deps.manager.upgrade() {
        let id = bot.id.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.stop_bot(&id).await {
                warn!(bot = %id, error = %e, "stop after fatal error failed");
            }
        });
    }

    true
}
