//! Timing constants and the result-awaiting wrapper.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{ExchangeError, Result};

/// Protocol timing constants.
pub mod constants {
    use super::Duration;

    /// Wait for the receiver's currency list (10 seconds).
    pub fn currency_discovery_timeout() -> Duration {
        Duration::from_secs(10)
    }

    /// Wait for the broker's final settlement record (30 seconds).
    pub fn exchange_timeout() -> Duration {
        Duration::from_secs(30)
    }

    /// Bound on a single settlement service call (10 seconds).
    pub fn settlement_timeout() -> Duration {
        Duration::from_secs(10)
    }

    /// Bound on a responder reading the message that opened its session
    /// (10 seconds).
    pub fn responder_receive_timeout() -> Duration {
        Duration::from_secs(10)
    }

    /// Directory refresh interval (5 seconds).
    pub fn directory_refresh_interval() -> Duration {
        Duration::from_secs(5)
    }
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Bound `future` by `limit`, converting expiry into a typed
/// [`ExchangeError::Timeout`] naming `operation`.
///
/// The future is dropped on expiry; whatever the counterparty was doing keeps
/// running on its own side.
pub async fn await_result<T, F>(operation: &str, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::Timeout(format!(
            "{} after {}ms",
            operation,
            limit.as_millis()
        ))),
    }
}
