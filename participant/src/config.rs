//! Participant node configuration.

use std::time::Duration;

use fxbroker_common::constants;

/// Configuration for a participant node.
#[derive(Debug, Clone)]
pub struct ParticipantConfig {
    /// How long to wait for the receiver's currency list.
    pub currency_discovery_timeout: Duration,
    /// How long to wait for the broker's payout record.
    pub exchange_timeout: Duration,
    /// Bound on each settlement service call.
    pub settlement_timeout: Duration,
    /// How long a responder waits for the message that opened its session.
    pub responder_receive_timeout: Duration,
    /// Directory refresh interval.
    pub directory_refresh_interval: Duration,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            currency_discovery_timeout: constants::currency_discovery_timeout(),
            exchange_timeout: constants::exchange_timeout(),
            settlement_timeout: constants::settlement_timeout(),
            responder_receive_timeout: constants::responder_receive_timeout(),
            directory_refresh_interval: constants::directory_refresh_interval(),
        }
    }
}

impl ParticipantConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(timeout) = env_millis("FX_DISCOVERY_TIMEOUT_MS") {
            config.currency_discovery_timeout = timeout;
        }

        if let Some(timeout) = env_millis("FX_EXCHANGE_TIMEOUT_MS") {
            config.exchange_timeout = timeout;
        }

        if let Some(timeout) = env_millis("FX_SETTLEMENT_TIMEOUT_MS") {
            config.settlement_timeout = timeout;
        }

        if let Some(timeout) = env_millis("FX_RESPONDER_RECEIVE_TIMEOUT_MS") {
            config.responder_receive_timeout = timeout;
        }

        if let Some(interval) = env_millis("FX_DIRECTORY_REFRESH_MS") {
            config.directory_refresh_interval = interval;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.currency_discovery_timeout.is_zero() {
            return Err("Currency discovery timeout cannot be zero".to_string());
        }

        if self.exchange_timeout.is_zero() {
            return Err("Exchange timeout cannot be zero".to_string());
        }

        if self.settlement_timeout.is_zero() {
            return Err("Settlement timeout cannot be zero".to_string());
        }

        if self.responder_receive_timeout.is_zero() {
            return Err("Responder receive timeout cannot be zero".to_string());
        }

        if self.directory_refresh_interval.is_zero() {
            return Err("Directory refresh interval cannot be zero".to_string());
        }

        Ok(())
    }
}

/// Read a millisecond duration from the environment. Unset or unparseable
/// values are ignored.
pub(crate) fn env_millis(name: &str) -> Option<Duration> {
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
        let config = ParticipantConfig::default();
        assert_eq!(config.currency_discovery_timeout, Duration::from_secs(10));
        assert_eq!(config.exchange_timeout, Duration::from_secs(30));
        assert_eq!(config.settlement_timeout, Duration::from_secs(10));
        assert_eq!(config.directory_refresh_interval, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ParticipantConfig {
            exchange_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ParticipantConfig {
            responder_receive_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("FX_EXCHANGE_TIMEOUT_MS", "2500");
        std::env::set_var("FX_DIRECTORY_REFRESH_MS", "not-a-number");
        std::env::set_var("FX_RESPONDER_RECEIVE_TIMEOUT_MS", "750");

        let config = ParticipantConfig::from_env();
        assert_eq!(config.exchange_timeout, Duration::from_millis(2500));
        assert_eq!(config.responder_receive_timeout, Duration::from_millis(750));
        assert_eq!(config.directory_refresh_interval, Duration::from_secs(5));

        std::env::remove_var("FX_EXCHANGE_TIMEOUT_MS");
        std::env::remove_var("FX_DIRECTORY_REFRESH_MS");
        std::env::remove_var("FX_RESPONDER_RECEIVE_TIMEOUT_MS");
    }
}
