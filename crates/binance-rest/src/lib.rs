//! Signed REST gateway for the exchange.
//!
//! Wraps the generic [`rest_client::RestClient`] with request signing,
//! server-time synchronisation and a uniform retry policy, and
//! normalises responses into [`model`] types.

mod client;
mod error;
mod responses;

pub use client::BinanceRestClient;
pub use error::BinanceRestError;
