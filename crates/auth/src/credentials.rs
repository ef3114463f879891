//! API credential management.

use crate::error::AuthError;
use secrecy::{ExposeSecret, SecretString};

/// API key pair for signed exchange requests.
///
/// The secret is held in a [`SecretString`]: it never appears in
/// `Debug` output and its memory is zeroed on drop.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
    api_secret: SecretString,
}

impl ApiCredentials {
    /// Load credentials from `BINANCE_API_KEY` / `BINANCE_API_SECRET`.
    ///
    /// A `.env` file in the working directory is honored when present.
    /// Missing variables are a hard error.
    pub fn from_env() -> Result<Self, AuthError> {
        dotenvy::dotenv().ok();

        let api_key = std::env::var("BINANCE_API_KEY")
            .map_err(|_| AuthError::MissingEnvVar("BINANCE_API_KEY".into()))?;

        let api_secret = std::env::var("BINANCE_API_SECRET")
            .map_err(|_| AuthError::MissingEnvVar("BINANCE_API_SECRET".into()))?;

        Ok(Self::new(api_key, api_secret))
    }

    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret: SecretString::from(api_secret),
        }
    }

    /// The API key (public, sent as a header).
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Expose the secret for signing. Never log the return value.
    pub fn expose_secret(&self) -> &str {
        self.api_secret.expose_secret()
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}
