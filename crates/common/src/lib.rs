//! Shared utilities: endpoint resolution, retry/backoff, exchange-filter
//! rounding, logging setup.

mod backoff;
mod environment;
mod retry;
mod rounding;

pub use backoff::ExponentialBackoff;
pub use environment::Endpoints;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use rounding::{floor_to_step, floor_to_tick, increment_precision};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Honors `RUST_LOG`; defaults to `info` when unset.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).compact())
        .init();
}

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}
