//! Rate store error types.

use fxbroker_common::{CurrencyCode, ExchangeError, Party};
use thiserror::Error;

/// Errors that can occur in the rate store.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RateError {
    /// Caller does not advertise the broker capability.
    #[error("Party {0} is not authorized to access rates")]
    NotAuthorized(Party),

    /// No rate for the ordered pair.
    #[error("No rate configured for {from}/{to}")]
    NoRateConfigured { from: CurrencyCode, to: CurrencyCode },

    /// A stored snapshot could not be parsed.
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// Rate value rejected.
    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    /// Currency code rejected.
    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    /// Snapshot could not be written.
    #[error("Snapshot log error: {0}")]
    Storage(String),
}

impl From<RateError> for ExchangeError {
    fn from(err: RateError) -> Self {
        match err {
            RateError::NotAuthorized(party) => ExchangeError::NotAuthorized(party),
            RateError::NoRateConfigured { from, to } => {
                ExchangeError::NoRateConfigured { from, to }
            }
            RateError::MalformedSnapshot(msg) => ExchangeError::MalformedSnapshot(msg),
            RateError::InvalidRate(msg) => ExchangeError::InvalidRate(msg),
            RateError::InvalidCurrency(code) => ExchangeError::InvalidCurrency(code),
            RateError::Storage(msg) => ExchangeError::InternalError(msg),
        }
    }
}

/// Result type for rate operations.
pub type RateResult<T> = Result<T, RateError>;
