//! DCA-Sell strategy: distribute on rips, re-enter through a single
//! buy-back at the average exit minus a margin.

use crate::bot::Bot;
use crate::dca_buy::FilledLot;
use crate::errors::{classify, fatal_code, BenignKind, EngineError, ErrorClass};
use crate::runner::{
    cancel_quietly, handle_loop_error, place_with_policy, BotRunner, RunnerDeps,
};
use crate::util::is_tagged;
use async_trait::async_trait;
use bus::OrderEvent;
use common::{epoch_ms, floor_to_step, floor_to_tick};
use model::{LocalOrder, LocalOrderStatus, OrderKind, OrderSide, SymbolInfo};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Default)]
pub(crate) struct DcaSellState {
    pub info: Option<SymbolInfo>,
    pub placed_sells: Vec<LocalOrder>,
    pub filled_sells: Vec<FilledLot>,
    /// The single buy-back order, when live.
    pub buy_back: Option<LocalOrder>,
    pub processed_fills: HashSet<u64>,
    pub last_activity_ms: i64,
}

#[derive(Default)]
struct Lifecycle {
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

pub struct DcaSellRunner {
    bot: Arc<Bot>,
    deps: RunnerDeps,
    state: Mutex<DcaSellState>,
    lifecycle: parking_lot::Mutex<Lifecycle>,
    me: Weak<Self>,
}

impl DcaSellRunner {
    pub fn new(bot: Arc<Bot>, deps: RunnerDeps) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            bot,
            deps,
            state: Mutex::new(DcaSellState::default()),
            lifecycle: parking_lot::Mutex::new(Lifecycle::default()),
            me: me.clone(),
        })
    }

    async fn ensure_info(&self, state: &mut DcaSellState) -> Result<SymbolInfo, EngineError> {
        if let Some(info) = &state.info {
            return Ok(info.clone());
        }
        let info = self.deps.gateway.symbol_info(&self.bot.symbol).await?;
        state.info = Some(info.clone());
        Ok(info)
    }

    async fn current_price(&self) -> Result<Decimal, EngineError> {
        if let Some(point) = self.deps.cache.get_price(&self.bot.symbol) {
            return Ok(point.price);
        }
        Ok(self.deps.gateway.price(&self.bot.symbol).await?)
    }

    /// Ladder `grid_levels` sells above the current price.
    async fn place_entries(
        &self,
        state: &mut DcaSellState,
        info: &SymbolInfo,
    ) -> Result<(), EngineError> {
        let config = self.bot.config();
        let price = self.current_price().await?;
        let qty = floor_to_step(config.order_size, info.filters.step_size);
        if qty <= Decimal::ZERO {
            warn!(bot = %self.bot.id, "orderSize rounds to zero, nothing to place");
            return Ok(());
        }

        let mut seen = HashSet::new();
        for level in 1..=config.grid_levels {
            let raw = price + Decimal::from(level) * config.grid_spread;
            let level_price = floor_to_tick(raw, info.filters.tick_size);
            if level_price <= Decimal::ZERO || !seen.insert(level_price) {
                continue;
            }

            let order = place_with_policy(
                &self.deps.gateway,
                &self.bot,
                OrderKind::Limit,
                OrderSide::Sell,
                level_price,
                qty,
            )
            .await?;
            state.placed_sells.push(order);
        }

        Ok(())
    }

    async fn setup(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let info = self.ensure_info(&mut state).await?;

        let open = self.deps.gateway.open_orders(&self.bot.symbol).await?;
        for view in open {
            if !is_tagged(&view.client_order_id, &self.bot.bot_tag) || !view.status.is_active() {
                continue;
            }
            let order = LocalOrder {
                order_id: view.order_id,
                client_order_id: view.client_order_id,
                side: view.side,
                price: view.price,
                qty: view.orig_qty,
                status: LocalOrderStatus::Open,
            };
            match view.side {
                OrderSide::Sell => state.placed_sells.push(order),
                OrderSide::Buy => {
                    if state.buy_back.is_none() {
                        state.buy_back = Some(order);
                    } else {
                        warn!(bot = %self.bot.id, order_id = order.order_id, "extra buy order found, canceling");
                        cancel_quietly(&self.deps.gateway, &self.bot, order.order_id).await;
                    }
                }
            }
        }

        if state.placed_sells.is_empty() && state.buy_back.is_none() {
            self.place_entries(&mut state, &info).await?;
        }

        state.last_activity_ms = epoch_ms();
        self.persist_bot();
        Ok(())
    }

    pub(crate) async fn on_order_event(&self, event: &OrderEvent) -> Result<(), EngineError> {
        let report = &event.report;
        if report.symbol != self.bot.symbol || !report.status.is_fill() {
            return Ok(());
        }

        let mut state = self.state.lock().await;

        let is_buy_back_fill = state
            .buy_back
            .as_ref()
            .is_some_and(|bb| bb.order_id == report.order_id);
        if is_buy_back_fill {
            if !state.processed_fills.insert(report.order_id) {
                return Ok(());
            }
            return self.on_buy_back_fill(&mut state).await;
        }

        let Some(pos) = state
            .placed_sells
            .iter()
            .position(|o| o.order_id == report.order_id)
        else {
            return Ok(());
        };
        if !state.processed_fills.insert(report.order_id) {
            return Ok(());
        }

        let filled = state.placed_sells.remove(pos);
        info!(bot = %self.bot.id, price = %filled.price, qty = %filled.qty, "exit sell filled");
        state.filled_sells.push(FilledLot {
            order_id: filled.order_id,
            price: filled.price,
            qty: filled.qty,
        });
        state.last_activity_ms = epoch_ms();

        let info = self.ensure_info(&mut state).await?;
        self.ensure_buy_back(&mut state, &info).await?;
        self.persist_bot();
        Ok(())
    }

    /// Keep exactly one buy at `floor_tick(avg − take_profit)` for the
    /// distributed quantity.
    async fn ensure_buy_back(
        &self,
        state: &mut DcaSellState,
        info: &SymbolInfo,
    ) -> Result<(), EngineError> {
        let total_qty: Decimal = state.filled_sells.iter().map(|lot| lot.qty).sum();
        let total_value: Decimal = state
            .filled_sells
            .iter()
            .map(|lot| lot.price * lot.qty)
            .sum();
        if total_qty <= Decimal::ZERO {
            return Ok(());
        }

        let margin = self.bot.config().take_profit.unwrap_or_default();
        let avg = total_value / total_qty;
        let target_price = floor_to_tick(avg - margin, info.filters.tick_size);
        let target_qty = floor_to_step(total_qty, info.filters.step_size);
        if target_price <= Decimal::ZERO || target_qty <= Decimal::ZERO {
            return Ok(());
        }

        if let Some(buy_back) = &state.buy_back {
            let half_tick = info.filters.tick_size / Decimal::from(2);
            let half_step = info.filters.step_size / Decimal::from(2);
            if (buy_back.price - target_price).abs() <= half_tick
                && (buy_back.qty - target_qty).abs() <= half_step
            {
                return Ok(());
            }

            match self
                .deps
                .gateway
                .cancel_order(&self.bot.symbol, buy_back.order_id)
                .await
            {
                Ok(_) => {}
                Err(err) => match classify(&err) {
                    ErrorClass::Benign(BenignKind::UnknownOrder) => {}
                    ErrorClass::FatalToBot => return Err(err.into()),
                    _ => {
                        warn!(bot = %self.bot.id, error = %err, "buy-back cancel failed, keeping current order");
                        return Ok(());
                    }
                },
            }
            state.buy_back = None;
        }

        info!(bot = %self.bot.id, price = %target_price, qty = %target_qty, "placing buy-back");
        let order = place_with_policy(
            &self.deps.gateway,
            &self.bot,
            OrderKind::Limit,
            OrderSide::Buy,
            target_price,
            target_qty,
        )
        .await?;

        state.buy_back = match order.status {
            LocalOrderStatus::Open => Some(order),
            _ => {
                warn!(bot = %self.bot.id, status = ?order.status, "buy-back placement did not open");
                None
            }
        };
        Ok(())
    }

    async fn on_buy_back_fill(&self, state: &mut DcaSellState) -> Result<(), EngineError> {
        let Some(buy_back) = state.buy_back.take() else {
            return Ok(());
        };

        let total_value_sold: Decimal = state
            .filled_sells
            .iter()
            .map(|lot| lot.price * lot.qty)
            .sum();
        let pnl = total_value_sold - buy_back.price * buy_back.qty;
        info!(bot = %self.bot.id, %pnl, "buy-back filled, round complete");
        self.add_stats(1, pnl);

        let leftovers: Vec<u64> = state
            .placed_sells
            .iter()
            .filter(|o| o.status == LocalOrderStatus::Open && o.order_id != 0)
            .map(|o| o.order_id)
            .collect();
        for order_id in leftovers {
            cancel_quietly(&self.deps.gateway, &self.bot, order_id).await;
        }
        state.placed_sells.clear();
        state.filled_sells.clear();
        state.last_activity_ms = epoch_ms();

        let info = self.ensure_info(state).await?;
        self.place_entries(state, &info).await?;
        self.persist_bot();
        Ok(())
    }

    fn add_stats(&self, rounds: u64, pnl: Decimal) {
        if let Some(manager) = self.deps.manager.upgrade() {
            manager.update_stats(&self.bot.id, rounds, pnl);
        } else {
            self.bot.with_state(|st| {
                st.stats.completed_rounds += rounds;
                st.stats.realized_pnl += pnl;
            });
            self.persist_bot();
        }
    }

    fn persist_bot(&self) {
        if let Err(e) = self.deps.store.save(&self.bot.id, &self.bot.snapshot()) {
            warn!(bot = %self.bot.id, error = %e, "failed to persist snapshot");
        }
    }

    fn auto_stop_deadline(&self) -> Option<tokio::time::Instant> {
        let config = self.bot.config();
        if config.duration_minutes == 0 {
            return None;
        }
        let started = self.bot.time_started().unwrap_or_else(epoch_ms);
        let end_ms = started + (config.duration_minutes as i64) * 60_000;
        let remaining = (end_ms - epoch_ms()).max(0) as u64;
        Some(tokio::time::Instant::now() + Duration::from_millis(remaining))
    }

    async fn run_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut order_rx = self.deps.bus.subscribe_order();
        let deadline = self.auto_stop_deadline();
        let far_future = tokio::time::Instant::now() + Duration::from_secs(86_400 * 365);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }

                event = order_rx.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = self.on_order_event(&event).await {
                            if handle_loop_error(&self.deps, &self.bot, "fill handling", &e) {
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(bot = %self.bot.id, skipped, "order events lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },

                _ = tokio::time::sleep_until(deadline.unwrap_or(far_future)), if deadline.is_some() => {
                    info!(bot = %self.bot.id, "configured duration reached, stopping");
                    if let Some(manager) = self.deps.manager.upgrade() {
                        let id = self.bot.id.clone();
                        tokio::spawn(async move {
                            if let Err(e) = manager.stop_bot(&id).await {
                                warn!(bot = %id, error = %e, "auto-stop failed");
                            }
                        });
                    }
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BotRunner for DcaSellRunner {
    async fn start(&self) -> Result<(), EngineError> {
        if let Err(e) = self.setup().await {
            if fatal_code(&e).is_some() {
                return Err(e);
            }
            warn!(bot = %self.bot.id, error = %e, "dca-sell setup incomplete");
        }

        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(me.run_loop(shutdown_rx));

        let mut lifecycle = self.lifecycle.lock();
        lifecycle.shutdown = Some(shutdown_tx);
        lifecycle.task = Some(task);
        Ok(())
    }

    async fn stop(&self) {
        let (shutdown, task) = {
            let mut lifecycle = self.lifecycle.lock();
            (lifecycle.shutdown.take(), lifecycle.task.take())
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        if let Some(task) = task {
            let _ = task.await;
        }

        let mut state = self.state.lock().await;

        match self.deps.gateway.open_orders(&self.bot.symbol).await {
            Ok(open) => {
                for view in open {
                    if is_tagged(&view.client_order_id, &self.bot.bot_tag)
                        && view.status.is_active()
                    {
                        cancel_quietly(&self.deps.gateway, &self.bot, view.order_id).await;
                    }
                }
            }
            Err(e) => {
                warn!(bot = %self.bot.id, error = %e, "open-order fetch failed on stop, using local list");
                let mut ids: Vec<u64> = state
                    .placed_sells
                    .iter()
                    .filter(|o| o.status == LocalOrderStatus::Open && o.order_id != 0)
                    .map(|o| o.order_id)
                    .collect();
                if let Some(buy_back) = &state.buy_back {
                    ids.push(buy_back.order_id);
                }
                for order_id in ids {
                    cancel_quietly(&self.deps.gateway, &self.bot, order_id).await;
                }
            }
        }

        state.placed_sells.clear();
        state.filled_sells.clear();
        state.buy_back = None;
        state.processed_fills.clear();
        self.persist_bot();
    }

    fn details(&self) -> serde_json::Value {
        match self.state.try_lock() {
            Ok(state) => json!({
                "placedSells": state.placed_sells,
                "filledSells": state.filled_sells,
                "buyBack": state.buy_back,
                "lastActivityMs": state.last_activity_ms,
            }),
            Err(_) => json!({ "busy": true }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::StrategyKind;
    use crate::test_support::{fill_event, test_bot, test_deps, MockGateway};
    use model::ExchangeOrderStatus;
    use rust_decimal_macros::dec;

    fn dca_sell_bot() -> Arc<Bot> {
        test_bot(StrategyKind::DcaSell, |config| {
            config.grid_levels = 2;
            config.grid_spread = dec!(5);
            config.order_size = dec!(1);
            config.take_profit = Some(dec!(5));
        })
    }

    async fn primed_runner(
        gateway: &Arc<MockGateway>,
    ) -> (Arc<DcaSellRunner>, Arc<Bot>, Vec<u64>) {
        gateway.set_info_filters(dec!(0.01), dec!(0.01));
        let bot = dca_sell_bot();
        let runner = DcaSellRunner::new(Arc::clone(&bot), test_deps(Arc::clone(gateway)));

        let mut ids = Vec::new();
        {
            let mut state = runner.state.lock().await;
            state.info = Some(gateway.info.lock().clone());
            for (order_id, price) in [(201u64, dec!(100)), (202, dec!(110))] {
                ids.push(order_id);
                state.placed_sells.push(LocalOrder {
                    order_id,
                    client_order_id: format!("{}-1-s-{order_id:04x}", bot.bot_tag),
                    side: OrderSide::Sell,
                    price,
                    qty: dec!(1),
                    status: LocalOrderStatus::Open,
                });
            }
        }
        (runner, bot, ids)
    }

    #[tokio::test]
    async fn entries_ladder_up_from_price() {
        let gateway = MockGateway::btcusdt(dec!(100.00));
        gateway.set_info_filters(dec!(0.01), dec!(0.01));
        let runner = DcaSellRunner::new(dca_sell_bot(), test_deps(gateway.clone()));

        runner.setup().await.unwrap();

        let placed = gateway.placed.lock().clone();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].price.unwrap(), dec!(105));
        assert_eq!(placed[1].price.unwrap(), dec!(110));
        assert!(placed.iter().all(|r| r.side == OrderSide::Sell));
    }

    #[tokio::test]
    async fn buy_back_tracks_average_exit_minus_margin() {
        let gateway = MockGateway::btcusdt(dec!(100.00));
        let (runner, _bot, ids) = primed_runner(&gateway).await;

        runner
            .on_order_event(&fill_event(
                "BTCUSDT",
                ids[0],
                OrderSide::Sell,
                dec!(100),
                dec!(1),
                ExchangeOrderStatus::Filled,
            ))
            .await
            .unwrap();
        {
            let state = runner.state.lock().await;
            let buy_back = state.buy_back.as_ref().unwrap();
            assert_eq!(buy_back.price, dec!(95));
            assert_eq!(buy_back.qty, dec!(1));
        }

        // Second sell at 110: avg 105, buy-back replaced at 100.00.
        runner
            .on_order_event(&fill_event(
                "BTCUSDT",
                ids[1],
                OrderSide::Sell,
                dec!(110),
                dec!(1),
                ExchangeOrderStatus::Filled,
            ))
            .await
            .unwrap();

        let state = runner.state.lock().await;
        let buy_back = state.buy_back.as_ref().unwrap();
        assert_eq!(buy_back.price, dec!(100.00));
        assert_eq!(buy_back.qty, dec!(2));
        assert_eq!(gateway.canceled.lock().len(), 1);
    }

    #[tokio::test]
    async fn buy_back_fill_books_pnl_and_restarts_the_cycle() {
        let gateway = MockGateway::btcusdt(dec!(102.00));
        let (runner, bot, ids) = primed_runner(&gateway).await;

        for (order_id, price) in [(ids[0], dec!(100)), (ids[1], dec!(110))] {
            runner
                .on_order_event(&fill_event(
                    "BTCUSDT",
                    order_id,
                    OrderSide::Sell,
                    price,
                    dec!(1),
                    ExchangeOrderStatus::Filled,
                ))
                .await
                .unwrap();
        }

        let buy_back_id = runner.state.lock().await.buy_back.as_ref().unwrap().order_id;

        runner
            .on_order_event(&fill_event(
                "BTCUSDT",
                buy_back_id,
                OrderSide::Buy,
                dec!(100),
                dec!(2),
                ExchangeOrderStatus::Filled,
            ))
            .await
            .unwrap();

        // P&L: (100 + 110) − 100·2 = 10.
        let stats = bot.stats();
        assert_eq!(stats.completed_rounds, 1);
        assert_eq!(stats.realized_pnl, dec!(10));

        let state = runner.state.lock().await;
        assert!(state.buy_back.is_none());
        assert!(state.filled_sells.is_empty());
        // New ladder above the current price of 102.
        assert_eq!(state.placed_sells.len(), 2);
        assert_eq!(state.placed_sells[0].price, dec!(107));
        assert_eq!(state.placed_sells[1].price, dec!(112));
    }
}
