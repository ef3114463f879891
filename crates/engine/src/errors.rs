//! Engine error types and the exchange-error classifier.

use binance_rest::BinanceRestError;
use store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bot not found: {0}")]
    NotFound(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Gateway(#[from] BinanceRestError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a runner should do about an exchange error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network/5xx; already retried by the gateway, safe to try later.
    Transient,
    /// Expected operational condition; compensate locally and go on.
    Benign(BenignKind),
    /// The bot cannot continue (bad key, bad request shape).
    FatalToBot,
    /// Anything else; log and mark the order failed.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenignKind {
    /// -2010: account cannot cover the order.
    InsufficientBalance,
    /// -2011 / -2013: order already gone on the exchange.
    UnknownOrder,
    /// -1013: price/quantity violates a filter, usually slippage.
    FilterFailure,
}

/// Classify an exchange error per the engine's error policy.
pub fn classify(err: &BinanceRestError) -> ErrorClass {
    match err.api_code() {
        Some(-2010) => ErrorClass::Benign(BenignKind::InsufficientBalance),
        Some(-2011) | Some(-2013) => ErrorClass::Benign(BenignKind::UnknownOrder),
        Some(-1013) => ErrorClass::Benign(BenignKind::FilterFailure),
        Some(-2014) | Some(-2015) | Some(-1102) => ErrorClass::FatalToBot,
        Some(_) => ErrorClass::Other,
        None => {
            if err.is_retryable() {
                ErrorClass::Transient
            } else {
                ErrorClass::Other
            }
        }
    }
}

/// The exchange code when `err` is fatal to the bot.
pub fn fatal_code(err: &EngineError) -> Option<i32> {
    match err {
        EngineError::Gateway(gateway_err) if classify(gateway_err) == ErrorClass::FatalToBot => {
            gateway_err.api_code()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: i32) -> BinanceRestError {
        BinanceRestError::Api {
            code,
            message: "test".into(),
        }
    }

    #[test]
    fn classifies_benign_codes() {
        assert_eq!(
            classify(&api(-2010)),
            ErrorClass::Benign(BenignKind::InsufficientBalance)
        );
        assert_eq!(
            classify(&api(-2011)),
            ErrorClass::Benign(BenignKind::UnknownOrder)
        );
        assert_eq!(
            classify(&api(-2013)),
            ErrorClass::Benign(BenignKind::UnknownOrder)
        );
        assert_eq!(
            classify(&api(-1013)),
            ErrorClass::Benign(BenignKind::FilterFailure)
        );
    }

    #[test]
    fn classifies_fatal_codes() {
        assert_eq!(classify(&api(-2014)), ErrorClass::FatalToBot);
        assert_eq!(classify(&api(-2015)), ErrorClass::FatalToBot);
        assert_eq!(classify(&api(-1102)), ErrorClass::FatalToBot);
    }

    #[test]
    fn unknown_codes_are_other() {
        assert_eq!(classify(&api(-9999)), ErrorClass::Other);
    }

    #[test]
    fn transport_errors_are_transient() {
        let err = BinanceRestError::Rest(rest_client::RestError::Timeout);
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn fatal_code_extraction() {
        let err = EngineError::Gateway(api(-2015));
        assert_eq!(fatal_code(&err), Some(-2015));

        let err = EngineError::Gateway(api(-2010));
        assert_eq!(fatal_code(&err), None);

        let err = EngineError::NotFound("x".into());
        assert_eq!(fatal_code(&err), None);
    }
}
