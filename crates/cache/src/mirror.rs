//! Optional Redis mirror for cache writes.
//!
//! The mirror is strictly best-effort: a missing or unreachable Redis
//! leaves the in-memory cache fully functional, and reads never
//! consult Redis.

use redis::aio::ConnectionManager;
use serde::Serialize;

#[derive(Clone)]
pub struct RedisMirror {
    conn: Option<ConnectionManager>,
}

impl RedisMirror {
    /// Connect to Redis at `url`. Connection failures are logged and
    /// produce a disabled mirror rather than an error.
    pub async fn connect(url: &str) -> Self {
        let conn = match Self::open(url).await {
            Ok(conn) => {
                tracing::info!(url, "connected cache mirror");
                Some(conn)
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "cache mirror unavailable, continuing in-memory");
                None
            }
        };

        Self { conn }
    }

    async fn open(url: &str) -> redis::RedisResult<ConnectionManager> {
        let client = redis::Client::open(url)?;
        ConnectionManager::new(client).await
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    /// Mirror a value as JSON under `key`; failures are logged at
    /// DEBUG and otherwise ignored.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        let Some(conn) = &self.conn else {
            return;
        };

        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(key, error = %e, "mirror serialization failed");
                return;
            }
        };

        let mut conn = conn.clone();
        if let Err(e) = redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
        {
            tracing::debug!(key, error = %e, "mirror write failed");
        }
    }
}
