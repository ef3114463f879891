//! The bot record and its lifecycle state.

use crate::config::BotConfig;
use common::epoch_ms;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The three supported strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Grid,
    DcaBuy,
    DcaSell,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::DcaBuy => "dca_buy",
            Self::DcaSell => "dca_sell",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grid" => Ok(Self::Grid),
            "dca_buy" => Ok(Self::DcaBuy),
            "dca_sell" => Ok(Self::DcaSell),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Stopped,
    Running,
}

/// Cumulative per-bot statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStats {
    pub completed_rounds: u64,
    pub realized_pnl: Decimal,
    pub last_duration_ms: i64,
}

/// Snapshot shape written to disk. Must round-trip losslessly,
/// including the lifecycle timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedBot {
    pub name: String,
    pub strategy: StrategyKind,
    pub symbol: String,
    pub status: BotStatus,
    pub config: BotConfig,
    pub stats: BotStats,
    pub time_created: i64,
    #[serde(default)]
    pub time_started: Option<i64>,
    #[serde(default)]
    pub time_stopped: Option<i64>,
}

/// Mutable bot state, always accessed under the bot's own lock.
#[derive(Debug)]
pub struct BotState {
    pub status: BotStatus,
    pub config: BotConfig,
    pub stats: BotStats,
    pub time_started: Option<i64>,
    pub time_stopped: Option<i64>,
    /// Equals `time_started` while running; never persisted.
    pub run_start_time: Option<i64>,
}

/// A bot. Identity fields are immutable; everything mutable sits
/// behind the internal mutex.
pub struct Bot {
    pub id: String,
    pub bot_tag: String,
    pub name: String,
    pub strategy: StrategyKind,
    pub symbol: String,
    pub time_created: i64,
    state: Mutex<BotState>,
}

impl Bot {
    /// Create a fresh, stopped bot with a new id.
    pub fn create(name: String, strategy: StrategyKind, symbol: String, config: BotConfig) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let bot_tag = Self::tag_of(&id);

        Self {
            id,
            bot_tag,
            name,
            strategy,
            symbol,
            time_created: epoch_ms(),
            state: Mutex::new(BotState {
                status: BotStatus::Stopped,
                config,
                stats: BotStats::default(),
                time_started: None,
                time_stopped: None,
                run_start_time: None,
            }),
        }
    }

    /// Rebuild a bot from its persisted snapshot.
    pub fn from_snapshot(id: String, snapshot: PersistedBot) -> Self {
        let bot_tag = Self::tag_of(&id);

        Self {
            id,
            bot_tag,
            name: snapshot.name,
            strategy: snapshot.strategy,
            symbol: snapshot.symbol,
            time_created: snapshot.time_created,
            state: Mutex::new(BotState {
                status: snapshot.status,
                config: snapshot.config,
                stats: snapshot.stats,
                time_started: snapshot.time_started,
                time_stopped: snapshot.time_stopped,
                run_start_time: None,
            }),
        }
    }

    /// First `-`-separated segment of the id, used to prefix client
    /// order ids so the bot can recognise its own orders.
    pub fn tag_of(id: &str) -> String {
        id.split('-').next().unwrap_or(id).to_string()
    }

    pub fn snapshot(&self) -> PersistedBot {
        let state = self.state.lock();
        PersistedBot {
            name: self.name.clone(),
            strategy: self.strategy,
            symbol: self.symbol.clone(),
            status: state.status,
            config: state.config.clone(),
            stats: state.stats.clone(),
            time_created: self.time_created,
            time_started: state.time_started,
            time_stopped: state.time_stopped,
        }
    }

    pub fn status(&self) -> BotStatus {
        self.state.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == BotStatus::Running
    }

    pub fn config(&self) -> BotConfig {
        self.state.lock().config.clone()
    }

    pub fn stats(&self) -> BotStats {
        self.state.lock().stats.clone()
    }

    pub fn time_started(&self) -> Option<i64> {
        self.state.lock().time_started
    }

    pub fn time_stopped(&self) -> Option<i64> {
        self.state.lock().time_stopped
    }

    /// Run `f` with the state lock held.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut BotState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Live duration while running, `last_duration_ms` otherwise.
    pub fn current_duration_ms(&self) -> i64 {
        let state = self.state.lock();
        match (state.status, state.run_start_time.or(state.time_started)) {
            (BotStatus::Running, Some(started)) => epoch_ms() - started,
            _ => state.stats.last_duration_ms,
        }
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("symbol", &self.symbol)
            .field("status", &self.status())
            .finish()
    }
}
