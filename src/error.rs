//! Exchange error types

use thiserror::Error;

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Errors raised while talking to an exchange.
///
/// The variant decides the retry behavior: `Temporary` and `DdosProtection`
/// are retried, everything else is surfaced immediately.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// A request the exchange rejected or that cannot be retried
    #[error("{0}")]
    Operational(String),

    /// A transient failure such as a network hiccup or a 5xx response
    #[error("{0}")]
    Temporary(String),

    /// The exchange is rate limiting us
    #[error("{0}")]
    DdosProtection(String),

    /// The exchange does not implement the requested operation
    #[error("{operation} is not supported by exchange {exchange}")]
    NotSupported {
        exchange: &'static str,
        operation: &'static str,
    },
}

impl ExchangeError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Temporary(_) | Self::DdosProtection(_))
    }

    /// Whether the error came from rate limiting and warrants a backoff.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::DdosProtection(_))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            ExchangeError::Temporary(err.to_string())
        } else {
            ExchangeError::Operational(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_variants() {
        assert!(ExchangeError::Temporary("x".into()).is_retryable());
        assert!(ExchangeError::DdosProtection("x".into()).is_retryable());
        assert!(!ExchangeError::Operational("x".into()).is_retryable());
        assert!(!ExchangeError::NotSupported {
            exchange: "binance",
            operation: "fetch_tickers",
        }
        .is_retryable());
    }

    #[test]
    fn only_ddos_protection_is_rate_limit() {
        assert!(ExchangeError::DdosProtection("x".into()).is_rate_limit());
        assert!(!ExchangeError::Temporary("x".into()).is_rate_limit());
    }

    #[test]
    fn not_supported_message() {
        let err = ExchangeError::NotSupported {
            exchange: "binance",
            operation: "fetch_order_book",
        };
        assert_eq!(
            err.to_string(),
            "fetch_order_book is not supported by exchange binance"
        );
    }
}
