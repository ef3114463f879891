//! Credential handling and request signing for the exchange API.
//!
//! Secrets are wrapped in [`secrecy::SecretString`] so they cannot leak
//! through `Debug` output and are zeroed on drop. Signing is
//! HMAC-SHA-256 over the canonical query string, hex-encoded.

mod credentials;
mod error;
mod signer;

pub use credentials::ApiCredentials;
pub use error::AuthError;
pub use signer::RequestSigner;
