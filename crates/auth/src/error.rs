use thiserror::Error;

/// Errors raised while loading credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A required environment variable is not set.
    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),
}
