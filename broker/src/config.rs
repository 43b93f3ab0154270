//! Broker configuration.

use std::time::Duration;

use fxbroker_common::{constants, CurrencyCode, IssueRef};

/// Configuration for the broker node.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Currency every incoming fee is assumed to be denominated in. Rates
    /// are looked up as `base_currency -> requested currency`.
    pub base_currency: CurrencyCode,
    /// Issuance reference stamped on payouts.
    pub issue_ref: IssueRef,
    /// How long a responder waits for the opening `ExchangeInfo`.
    pub receive_timeout: Duration,
    /// Bound on each settlement service call.
    pub settlement_timeout: Duration,
    /// How often the directory snapshot is refreshed from its source.
    pub directory_refresh_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_currency: CurrencyCode::usd(),
            issue_ref: IssueRef::default(),
            receive_timeout: constants::responder_receive_timeout(),
            settlement_timeout: constants::settlement_timeout(),
            directory_refresh_interval: constants::directory_refresh_interval(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(code) = std::env::var("FX_BASE_CURRENCY") {
            if let Ok(currency) = CurrencyCode::new(&code) {
                config.base_currency = currency;
            }
        }

        if let Ok(reference) = std::env::var("FX_ISSUE_REF") {
            if let Ok(reference) = reference.trim().parse::<u8>() {
                config.issue_ref = IssueRef(reference);
            }
        }

        if let Some(timeout) = env_millis("FX_BROKER_RECEIVE_TIMEOUT_MS") {
            config.receive_timeout = timeout;
        }

        if let Some(timeout) = env_millis("FX_SETTLEMENT_TIMEOUT_MS") {
            config.settlement_timeout = timeout;
        }

        if let Some(interval) = env_millis("FX_DIRECTORY_REFRESH_MS") {
            config.directory_refresh_interval = interval;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.receive_timeout.is_zero() {
            return Err("Receive timeout cannot be zero".to_string());
        }

        if self.settlement_timeout.is_zero() {
            return Err("Settlement timeout cannot be zero".to_string());
        }

        if self.directory_refresh_interval.is_zero() {
            return Err("Directory refresh interval cannot be zero".to_string());
        }

        Ok(())
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.base_currency, CurrencyCode::usd());
        assert_eq!(config.issue_ref, IssueRef(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("FX_BASE_CURRENCY", "eur");
        std::env::set_var("FX_ISSUE_REF", "7");
        std::env::set_var("FX_BROKER_RECEIVE_TIMEOUT_MS", "1500");

        let config = BrokerConfig::from_env();
        assert_eq!(config.base_currency, CurrencyCode::eur());
        assert_eq!(config.issue_ref, IssueRef(7));
        assert_eq!(config.receive_timeout, Duration::from_millis(1500));

        std::env::remove_var("FX_BASE_CURRENCY");
        std::env::remove_var("FX_ISSUE_REF");
        std::env::remove_var("FX_BROKER_RECEIVE_TIMEOUT_MS");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = BrokerConfig {
            settlement_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
