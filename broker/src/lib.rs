//! FxBroker Broker
//!
//! The broker is the trusted party holding conversion rates. It accepts fee
//! payments from initiators and pays the receiving party out in the currency
//! the receiver asked for.

pub mod broker;
pub mod config;
pub mod exchange_responder;
pub mod metrics;
pub mod state;

pub use broker::{Broker, BrokerBuilder};
pub use config::BrokerConfig;
pub use exchange_responder::{compute_payout, ExchangeResponder, ExchangeResponderState};
pub use metrics::{BrokerMetrics, BrokerMetricsSnapshot};
pub use state::BrokerState;
