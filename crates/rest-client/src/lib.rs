//! Thin HTTP client wrapper around reqwest.

mod client;
mod error;

pub use client::RestClient;
pub use error::RestError;
