//! Bot registry and lifecycle.

use crate::bot::{Bot, BotStats, BotStatus, PersistedBot, StrategyKind};
use crate::config::BotConfig;
use crate::errors::{fatal_code, EngineError};
use crate::gateway::ExchangeGateway;
use crate::runner::{BotRunner, RunnerDeps, RunnerFactory};
use bus::{BotEvent, EventBus};
use cache::MarketCache;
use common::epoch_ms;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use store::SnapshotStore;
use tracing::{error, info, warn};

/// Parameters for creating a bot.
#[derive(Debug, Clone)]
pub struct CreateBotRequest {
    pub name: String,
    pub strategy: StrategyKind,
    pub symbol: String,
    pub config: BotConfig,
}

/// Projection of a bot for listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSummary {
    pub id: String,
    pub name: String,
    pub strategy: StrategyKind,
    pub symbol: String,
    pub status: BotStatus,
    pub stats: BotStats,
    pub time_created: i64,
    pub time_started: Option<i64>,
    pub time_stopped: Option<i64>,
    /// Live duration while running, last run's duration otherwise.
    pub current_duration_ms: i64,
}

struct BotEntry {
    bot: Arc<Bot>,
    runner: Arc<dyn BotRunner>,
}

/// Owns every bot and serialises lifecycle transitions per bot.
pub struct BotManager {
    gateway: Arc<dyn ExchangeGateway>,
    bus: Arc<EventBus>,
    cache: Arc<MarketCache>,
    store: Arc<SnapshotStore>,
    bots: RwLock<HashMap<String, BotEntry>>,
}

impl BotManager {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        bus: Arc<EventBus>,
        cache: Arc<MarketCache>,
        store: Arc<SnapshotStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            bus,
            cache,
            store,
            bots: RwLock::new(HashMap::new()),
        })
    }

    fn deps(self: &Arc<Self>) -> RunnerDeps {
        RunnerDeps {
            gateway: Arc::clone(&self.gateway),
            bus: Arc::clone(&self.bus),
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            manager: Arc::downgrade(self),
        }
    }

    /// Persist a bot's snapshot. Persistence failures are logged, not
    /// propagated.
    pub fn persist(&self, bot: &Bot) {
        if let Err(e) = self.store.save(&bot.id, &bot.snapshot()) {
            error!(bot = %bot.id, error = %e, "failed to persist snapshot");
        }
    }

    fn entry(&self, id: &str) -> Result<(Arc<Bot>, Arc<dyn BotRunner>), EngineError> {
        let bots = self.bots.read();
        bots.get(id)
            .map(|entry| (Arc::clone(&entry.bot), Arc::clone(&entry.runner)))
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    pub fn bot(&self, id: &str) -> Option<Arc<Bot>> {
        self.bots.read().get(id).map(|e| Arc::clone(&e.bot))
    }

    /// Create a bot: validate, persist the initial snapshot, then
    /// construct the runner and register the pair.
    pub fn create_bot(
        self: &Arc<Self>,
        req: CreateBotRequest,
        factory: &RunnerFactory,
    ) -> Result<Arc<Bot>, EngineError> {
        req.config.validate(req.strategy)?;

        let bot = Arc::new(Bot::create(req.name, req.strategy, req.symbol, req.config));

        // The snapshot must exist before the runner does.
        self.store.save(&bot.id, &bot.snapshot())?;

        let runner = factory(Arc::clone(&bot), self.deps());
        self.bots.write().insert(
            bot.id.clone(),
            BotEntry {
                bot: Arc::clone(&bot),
                runner,
            },
        );

        info!(bot = %bot.id, name = %bot.name, strategy = bot.strategy.as_str(), symbol = %bot.symbol, "bot created");
        self.bus.publish_bot(BotEvent::Created {
            id: bot.id.clone(),
            name: bot.name.clone(),
            strategy: bot.strategy.as_str().to_string(),
            symbol: bot.symbol.clone(),
        });

        Ok(bot)
    }

    /// Start a bot. Starting a running bot is a no-op. `time_started`
    /// is only set when absent so duration survives restarts.
    pub async fn start_bot(&self, id: &str) -> Result<(), EngineError> {
        let (bot, runner) = self.entry(id)?;

        let already_running = bot.with_state(|st| {
            if st.status == BotStatus::Running {
                return true;
            }
            st.status = BotStatus::Running;
            if st.time_started.is_none() {
                st.time_started = Some(epoch_ms());
            }
            st.time_stopped = None;
            st.run_start_time = st.time_started;
            false
        });

        if already_running {
            return Ok(());
        }

        self.persist(&bot);
        self.bus
            .publish_bot(BotEvent::Started { id: bot.id.clone() });

        if let Err(e) = runner.start().await {
            if let Some(code) = fatal_code(&e) {
                error!(bot = %bot.id, code, error = %e, "fatal error on start, stopping bot");
                self.bus.publish_bot(BotEvent::BotError {
                    id: bot.id.clone(),
                    code: Some(code),
                    message: e.to_string(),
                });
                self.stop_bot(id).await?;
                return Ok(());
            }
            // Non-fatal start trouble leaves the bot running; the
            // runner repairs itself on its reconciliation schedule.
            warn!(bot = %bot.id, error = %e, "runner start incomplete");
        }

        self.persist(&bot);
        Ok(())
    }

    /// Stop a bot. Stopping a stopped bot is a no-op.
    pub async fn stop_bot(&self, id: &str) -> Result<(), EngineError> {
        let (bot, runner) = self.entry(id)?;

        let was_running = bot.with_state(|st| {
            if st.status == BotStatus::Stopped {
                return false;
            }
            let now = epoch_ms();
            if let Some(run_start) = st.run_start_time.or(st.time_started) {
                st.stats.last_duration_ms = now - run_start;
            }
            st.status = BotStatus::Stopped;
            st.time_stopped = Some(now);
            st.run_start_time = None;
            true
        });

        if !was_running {
            return Ok(());
        }

        runner.stop().await;
        self.persist(&bot);
        self.bus
            .publish_bot(BotEvent::Stopped { id: bot.id.clone() });
        info!(bot = %bot.id, "bot stopped");

        Ok(())
    }

    /// Rebuild every persisted bot. Bots that were running when the
    /// process died are resumed without touching `time_started`.
    pub async fn load_bots_from_disk(self: &Arc<Self>, factory: &RunnerFactory) {
        let snapshots: Vec<(String, PersistedBot)> = self.store.load_all();
        info!(count = snapshots.len(), "loading bots from disk");

        for (id, snapshot) in snapshots {
            let resume = snapshot.status == BotStatus::Running;
            let bot = Arc::new(Bot::from_snapshot(id, snapshot));
            let runner = factory(Arc::clone(&bot), self.deps());

            self.bots.write().insert(
                bot.id.clone(),
                BotEntry {
                    bot: Arc::clone(&bot),
                    runner: Arc::clone(&runner),
                },
            );

            if resume {
                bot.with_state(|st| st.run_start_time = st.time_started);
                info!(bot = %bot.id, "resuming bot after restart");

                if let Err(e) = runner.start().await {
                    if let Some(code) = fatal_code(&e) {
                        error!(bot = %bot.id, code, error = %e, "fatal error on resume");
                        self.bus.publish_bot(BotEvent::BotError {
                            id: bot.id.clone(),
                            code: Some(code),
                            message: e.to_string(),
                        });
                        let _ = self.stop_bot(&bot.id).await;
                    } else {
                        warn!(bot = %bot.id, error = %e, "resume incomplete");
                    }
                }
            }
        }
    }

    /// Fold realised P&L and completed rounds into a bot's stats.
    pub fn update_stats(&self, id: &str, rounds_delta: u64, pnl_delta: Decimal) {
        let Some(bot) = self.bot(id) else {
            return;
        };

        bot.with_state(|st| {
            st.stats.completed_rounds += rounds_delta;
            st.stats.realized_pnl += pnl_delta;
        });
        self.persist(&bot);
    }

    pub fn list_bots(&self) -> Vec<BotSummary> {
        let bots = self.bots.read();
        let mut summaries: Vec<BotSummary> = bots
            .values()
            .map(|entry| Self::summarize(&entry.bot))
            .collect();
        summaries.sort_by(|a, b| a.time_created.cmp(&b.time_created));
        summaries
    }

    fn summarize(bot: &Bot) -> BotSummary {
        BotSummary {
            id: bot.id.clone(),
            name: bot.name.clone(),
            strategy: bot.strategy,
            symbol: bot.symbol.clone(),
            status: bot.status(),
            stats: bot.stats(),
            time_created: bot.time_created,
            time_started: bot.time_started(),
            time_stopped: bot.time_stopped(),
            current_duration_ms: bot.current_duration_ms(),
        }
    }

    /// Summary plus runner-specific detail for one bot.
    pub fn get_details(&self, id: &str) -> Result<serde_json::Value, EngineError> {
        let (bot, runner) = self.entry(id)?;
        let mut value = serde_json::to_value(Self::summarize(&bot))
            .unwrap_or_else(|_| serde_json::Value::Null);

        if let serde_json::Value::Object(map) = &mut value {
            map.insert("details".to_string(), runner.details());
        }
        Ok(value)
    }

    /// Stop (if needed) and delete a bot and its snapshot.
    pub async fn remove_bot(&self, id: &str) -> Result<(), EngineError> {
        self.stop_bot(id).await?;
        self.bots.write().remove(id);
        self.store.delete(id);
        self.bus.publish_bot(BotEvent::Removed { id: id.to_string() });
        Ok(())
    }

    /// Graceful shutdown: stop every running bot, awaiting each.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = {
            let bots = self.bots.read();
            bots.values()
                .filter(|e| e.bot.is_running())
                .map(|e| e.bot.id.clone())
                .collect()
        };

        for id in ids {
            if let Err(e) = self.stop_bot(&id).await {
                warn!(bot = %id, error = %e, "failed to stop bot during shutdown");
            }
        }
    }
}
