//! Gateway error types.

use auth::AuthError;
use rest_client::RestError;
use thiserror::Error;

/// Errors from the exchange gateway.
#[derive(Debug, Error)]
pub enum BinanceRestError {
    /// Transport failure (network, timeout, non-API HTTP error).
    #[error("REST error: {0}")]
    Rest(#[from] RestError),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Logical error returned by the exchange; the original code and
    /// message are preserved for classification by callers.
    #[error("exchange error {code}: {message}")]
    Api { code: i32, message: String },

    #[error("parse error: {0}")]
    Parse(String),
}

impl BinanceRestError {
    /// Turn a transport error into an API error when the body carries
    /// the exchange's `{"code": …, "msg": …}` shape.
    pub fn from_rest(err: RestError) -> Self {
        if let RestError::Http { status, ref body } = err {
            // 4xx bodies carry exchange error codes; 5xx stay transport
            // errors so the retry layer sees them.
            if status < 500 {
                if let Some(api) = Self::parse_api_body(body) {
                    return api;
                }
            }
        }
        Self::Rest(err)
    }

    fn parse_api_body(body: &str) -> Option<Self> {
        #[derive(serde::Deserialize)]
        struct ApiErrorBody {
            code: i32,
            msg: String,
        }

        serde_json::from_str::<ApiErrorBody>(body)
            .ok()
            .map(|e| Self::Api {
                code: e.code,
                message: e.msg,
            })
    }

    /// The exchange error code, if this is a logical exchange error.
    pub fn api_code(&self) -> Option<i32> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Transport-level failures are retryable; logical exchange errors
    /// never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rest(rest) if rest.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_body_is_classified() {
        let err = BinanceRestError::from_rest(RestError::Http {
            status: 400,
            body: r#"{"code":-2010,"msg":"Account has insufficient balance"}"#.into(),
        });

        assert_eq!(err.api_code(), Some(-2010));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("insufficient balance"));
    }

    #[test]
    fn server_errors_stay_transport_and_retryable() {
        let err = BinanceRestError::from_rest(RestError::Http {
            status: 502,
            body: "bad gateway".into(),
        });

        assert_eq!(err.api_code(), None);
        assert!(err.is_retryable());
    }

    #[test]
    fn unparseable_body_stays_transport() {
        let err = BinanceRestError::from_rest(RestError::Http {
            status: 404,
            body: "not found".into(),
        });

        assert_eq!(err.api_code(), None);
        assert!(!err.is_retryable());
    }
}
