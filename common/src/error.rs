//! Error types for the FX broker protocol.

use thiserror::Error;

use crate::identifiers::Party;
use crate::monetary::CurrencyCode;

/// Main error type for FX broker operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    /// A bounded wait expired.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Capability check failed.
    #[error("Party {0} is not authorized as a broker")]
    NotAuthorized(Party),

    /// Payer's holding cannot cover the amount.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    /// Settlement layer rejected an operation.
    #[error("Settlement failure: {0}")]
    SettlementFailure(String),

    /// No rate for the ordered pair.
    #[error("No rate configured for {from}/{to}")]
    NoRateConfigured { from: CurrencyCode, to: CurrencyCode },

    /// A rate snapshot failed to parse.
    #[error("Malformed rate snapshot: {0}")]
    MalformedSnapshot(String),

    /// The receiver offered no currency to select from.
    #[error("Receiver {0} offered no currency")]
    NoCurrencySelected(Party),

    /// A rate is negative or yields a discount larger than the amount.
    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    /// Currency code is not a three letter code.
    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    /// Amount is not acceptable for the operation.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// A message of another type arrived on the session.
    #[error("Unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: &'static str,
    },

    /// Party is not known to the network or directory.
    #[error("Unknown party: {0}")]
    UnknownParty(String),

    /// The local endpoint or session has been shut down.
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ExchangeError {
    /// Check if this error is retryable by the caller.
    ///
    /// Nothing in the protocol retries automatically; this is advice for
    /// whoever started the negotiation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Timeout(_)
                | ExchangeError::SettlementFailure(_)
                | ExchangeError::TransportClosed(_)
        )
    }

    /// Get error code for logs and protocol results.
    pub fn error_code(&self) -> &'static str {
        match self {
            ExchangeError::Timeout(_) => "TIMEOUT",
            ExchangeError::NotAuthorized(_) => "NOT_AUTHORIZED",
            ExchangeError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            ExchangeError::SettlementFailure(_) => "SETTLEMENT_FAILURE",
            ExchangeError::NoRateConfigured { .. } => "NO_RATE_CONFIGURED",
            ExchangeError::MalformedSnapshot(_) => "MALFORMED_SNAPSHOT",
            ExchangeError::NoCurrencySelected(_) => "NO_CURRENCY_SELECTED",
            ExchangeError::InvalidRate(_) => "INVALID_RATE",
            ExchangeError::InvalidCurrency(_) => "INVALID_CURRENCY",
            ExchangeError::InvalidAmount(_) => "INVALID_AMOUNT",
            ExchangeError::UnexpectedMessage { .. } => "UNEXPECTED_MESSAGE",
            ExchangeError::UnknownParty(_) => "UNKNOWN_PARTY",
            ExchangeError::TransportClosed(_) => "TRANSPORT_CLOSED",
            ExchangeError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            ExchangeError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for FX broker operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ExchangeError::Timeout("x".into()).error_code(), "TIMEOUT");
        assert_eq!(
            ExchangeError::NoCurrencySelected(Party::named("NodeB")).error_code(),
            "NO_CURRENCY_SELECTED"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ExchangeError::Timeout("exchange".into()).is_retryable());
        assert!(!ExchangeError::NotAuthorized(Party::named("NodeA")).is_retryable());
        assert!(!ExchangeError::InsufficientFunds {
            required: 10,
            available: 5
        }
        .is_retryable());
    }
}
