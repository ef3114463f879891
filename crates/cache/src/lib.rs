//! In-memory price/balance cache with TTL semantics and an optional
//! Redis mirror.
//!
//! Streams write, runners and the admin surface read. Entries are
//! served only while younger than their maximum age; stale entries
//! read as absent so callers fall back to REST.

mod mirror;

pub use mirror::RedisMirror;

use model::AssetBalance;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default maximum age for cached prices.
const PRICE_MAX_AGE: Duration = Duration::from_secs(30);

/// Default maximum age for cached balances.
const BALANCE_MAX_AGE: Duration = Duration::from_secs(300);

/// A cached price observation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PricePoint {
    pub price: Decimal,
    /// Exchange event time, epoch ms.
    pub ts: i64,
}

pub type BalanceMap = HashMap<String, AssetBalance>;

struct Timed<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> Timed<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
        }
    }

    fn fresh(&self, max_age: Duration) -> bool {
        self.inserted_at.elapsed() <= max_age
    }
}

/// Shared read/write cache for prices and account balances.
pub struct MarketCache {
    prices: RwLock<HashMap<String, Timed<PricePoint>>>,
    balances: RwLock<Option<Timed<BalanceMap>>>,
    price_max_age: Duration,
    mirror: Option<RedisMirror>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            balances: RwLock::new(None),
            price_max_age: PRICE_MAX_AGE,
            mirror: None,
        }
    }

    /// Attach a Redis mirror; writes are duplicated best-effort, reads
    /// stay purely in-memory.
    pub fn with_mirror(mut self, mirror: RedisMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    #[cfg(test)]
    fn with_price_max_age(mut self, max_age: Duration) -> Self {
        self.price_max_age = max_age;
        self
    }

    fn price_key(symbol: &str) -> String {
        format!("price:{}", symbol.to_uppercase())
    }

    /// Record a price observation for a symbol.
    pub async fn set_price(&self, symbol: &str, price: Decimal, ts: i64) {
        let point = PricePoint { price, ts };
        self.prices
            .write()
            .insert(symbol.to_uppercase(), Timed::new(point));

        if let Some(mirror) = &self.mirror {
            mirror.set_json(&Self::price_key(symbol), &point).await;
        }
    }

    /// Latest price for a symbol, if younger than the default max age.
    pub fn get_price(&self, symbol: &str) -> Option<PricePoint> {
        self.get_price_with_max_age(symbol, self.price_max_age)
    }

    pub fn get_price_with_max_age(&self, symbol: &str, max_age: Duration) -> Option<PricePoint> {
        let prices = self.prices.read();
        prices
            .get(&symbol.to_uppercase())
            .filter(|entry| entry.fresh(max_age))
            .map(|entry| entry.value)
    }

    /// Replace the cached account balances.
    pub async fn set_balances(&self, balances: BalanceMap) {
        if let Some(mirror) = &self.mirror {
            mirror.set_json("account:balances", &balances).await;
        }
        *self.balances.write() = Some(Timed::new(balances));
    }

    /// Merge updated balances into the cached set (user-stream deltas
    /// carry only the assets that changed).
    pub async fn update_balances(&self, updates: impl IntoIterator<Item = (String, AssetBalance)>) {
        let merged = {
            let mut guard = self.balances.write();
            let mut map = guard.take().map(|t| t.value).unwrap_or_default();
            for (asset, balance) in updates {
                map.insert(asset, balance);
            }
            *guard = Some(Timed::new(map.clone()));
            map
        };

        if let Some(mirror) = &self.mirror {
            mirror.set_json("account:balances", &merged).await;
        }
    }

    /// Cached balances, if fresh.
    pub fn get_balances(&self) -> Option<BalanceMap> {
        let balances = self.balances.read();
        balances
            .as_ref()
            .filter(|entry| entry.fresh(BALANCE_MAX_AGE))
            .map(|entry| entry.value.clone())
    }
}

impl Default for MarketCache {
    fn default() -> Self {
        Self::new()
    }
}
