//! Exchange endpoint resolution.

const DEFAULT_REST_BASE: &str = "https://api.binance.com";
const DEFAULT_WS_BASE: &str = "wss://stream.binance.com:9443";

/// REST and WebSocket base URLs for the exchange.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub rest_base_url: String,
    pub ws_base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            rest_base_url: DEFAULT_REST_BASE.to_string(),
            ws_base_url: DEFAULT_WS_BASE.to_string(),
        }
    }
}

impl Endpoints {
    /// Resolve endpoints, honoring `BINANCE_BASE_URL` and
    /// `BINANCE_WS_URL` overrides (useful for testnet or mocks).
    pub fn from_env() -> Self {
        let rest_base_url = std::env::var("BINANCE_BASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_REST_BASE.to_string());

        let ws_base_url = std::env::var("BINANCE_WS_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_WS_BASE.to_string());

        Self {
            rest_base_url,
            ws_base_url,
        }
    }
}
