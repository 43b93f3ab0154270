//! Simulation scenarios.

use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Nodes taking part.
    #[serde(default)]
    pub topology: Topology,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// The nodes of a simulated network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    /// Notary validating issuances.
    pub notary: String,
    /// The broker.
    pub broker: NodeSpec,
    /// Requesters and receivers.
    pub participants: Vec<NodeSpec>,
    /// Initiator wait for the broker's result.
    #[serde(default = "default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,
}

/// Name and capability tags of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NodeSpec {
    pub fn new(name: &str, tags: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

fn default_exchange_timeout_ms() -> u64 {
    30_000
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            notary: "Controller".to_string(),
            broker: NodeSpec::new("NodeC", &["fx.broker", "settlement.issuer"]),
            participants: vec![
                NodeSpec::new("NodeA", &["main.currency.usd"]),
                NodeSpec::new("NodeB", &["main.currency.gbp"]),
                NodeSpec::new("NodeD", &["main.currency.jpy"]),
                NodeSpec::new("NodeE", &[]),
            ],
            exchange_timeout_ms: default_exchange_timeout_ms(),
        }
    }
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Issue currency from `issuer` to `to`.
    Issue {
        issuer: String,
        to: String,
        quantity: u64,
        currency: String,
    },
    /// Redeem `owner`'s holding back to `issuer`.
    Exit {
        owner: String,
        quantity: u64,
        currency: String,
        issuer: String,
    },
    /// Set a rate on the broker.
    SetRate {
        from: String,
        to: String,
        rate: Decimal,
    },
    /// Run one exchange. The fee is denominated in `currency` issued by
    /// `issuer`.
    Exchange {
        initiator: String,
        receiver: String,
        quantity: u64,
        currency: String,
        issuer: String,
    },
    /// Inject a fault.
    InjectFault { fault_type: FaultType, target: String },
    /// Clear a fault.
    ClearFault { fault_type: FaultType, target: String },
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum FaultType {
    /// Node drops every message sent to it.
    NodeOffline,
    /// Settlement service rejects every call.
    LedgerOffline,
}

/// Conditions that can be asserted. `exchange` is the zero-based index of an
/// `Exchange` step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// Exchange returned a payout record.
    ExchangeSucceeded { exchange: usize },
    /// Exchange failed with the given error code.
    ExchangeFailed { exchange: usize, error_code: String },
    /// The record returned to the initiator pays `quantity` to `receiver`.
    PayoutEquals {
        exchange: usize,
        receiver: String,
        quantity: u64,
        currency: String,
    },
    /// Party's holding in a currency, across issuers.
    BalanceEquals {
        party: String,
        currency: String,
        quantity: u64,
    },
}

impl Scenario {
    /// Load a built-in scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "discounted-payout" => Ok(Self::discounted_payout()),
            "no-currency" => Ok(Self::no_currency()),
            "missing-rate" => Ok(Self::missing_rate()),
            "broker-unresponsive" => Ok(Self::broker_unresponsive()),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Names of the built-in scenarios.
    pub fn builtin_names() -> &'static [&'static str] {
        &[
            "discounted-payout",
            "no-currency",
            "missing-rate",
            "broker-unresponsive",
        ]
    }

    /// Load a scenario from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Funding shared by the built-in scenarios: NodeA holds 1000 USD and the
    /// broker holds 1000 GBP and 1000 JPY, all issued by the broker.
    fn funding() -> Vec<ScenarioStep> {
        [("NodeA", "USD"), ("NodeC", "GBP"), ("NodeC", "JPY")]
            .into_iter()
            .map(|(to, currency)| ScenarioStep::Issue {
                issuer: "NodeC".to_string(),
                to: to.to_string(),
                quantity: 1_000,
                currency: currency.to_string(),
            })
            .collect()
    }

    fn exchange_to(receiver: &str) -> ScenarioStep {
        ScenarioStep::Exchange {
            initiator: "NodeA".to_string(),
            receiver: receiver.to_string(),
            quantity: 100,
            currency: "USD".to_string(),
            issuer: "NodeC".to_string(),
        }
    }

    fn balance(party: &str, currency: &str, quantity: u64) -> ScenarioStep {
        ScenarioStep::Assert {
            condition: AssertCondition::BalanceEquals {
                party: party.to_string(),
                currency: currency.to_string(),
                quantity,
            },
        }
    }

    /// 100 USD to a GBP receiver at 0.2 pays 80 GBP.
    fn discounted_payout() -> Self {
        let mut steps = Self::funding();
        steps.extend([
            ScenarioStep::SetRate {
                from: "USD".to_string(),
                to: "GBP".to_string(),
                rate: Decimal::new(2, 1),
            },
            Self::exchange_to("NodeB"),
            ScenarioStep::Assert {
                condition: AssertCondition::PayoutEquals {
                    exchange: 0,
                    receiver: "NodeB".to_string(),
                    quantity: 80,
                    currency: "GBP".to_string(),
                },
            },
            Self::balance("NodeB", "GBP", 80),
            Self::balance("NodeA", "USD", 900),
            Self::balance("NodeC", "USD", 100),
        ]);

        Self {
            name: "discounted-payout".to_string(),
            description: "USD fee paid out in GBP at a configured rate".to_string(),
            topology: Topology::default(),
            steps,
        }
    }

    /// A receiver with no holdings and no main currency stops the exchange
    /// before the fee is paid.
    fn no_currency() -> Self {
        let mut steps = Self::funding();
        steps.extend([
            Self::exchange_to("NodeE"),
            ScenarioStep::Assert {
                condition: AssertCondition::ExchangeFailed {
                    exchange: 0,
                    error_code: "NO_CURRENCY_SELECTED".to_string(),
                },
            },
            Self::balance("NodeA", "USD", 1_000),
        ]);

        Self {
            name: "no-currency".to_string(),
            description: "Receiver accepts no currency".to_string(),
            topology: Topology::default(),
            steps,
        }
    }

    /// No USD/JPY rate: the whole amount is paid out in JPY.
    fn missing_rate() -> Self {
        let mut steps = Self::funding();
        steps.extend([
            ScenarioStep::SetRate {
                from: "USD".to_string(),
                to: "GBP".to_string(),
                rate: Decimal::new(2, 1),
            },
            Self::exchange_to("NodeD"),
            ScenarioStep::Assert {
                condition: AssertCondition::PayoutEquals {
                    exchange: 0,
                    receiver: "NodeD".to_string(),
                    quantity: 100,
                    currency: "JPY".to_string(),
                },
            },
            Self::balance("NodeD", "JPY", 100),
        ]);

        Self {
            name: "missing-rate".to_string(),
            description: "Exchange into a currency without a configured rate".to_string(),
            topology: Topology::default(),
            steps,
        }
    }

    /// The broker drops the exchange request; the initiator times out and
    /// the fee stays with the broker.
    fn broker_unresponsive() -> Self {
        let mut steps = Self::funding();
        steps.extend([
            ScenarioStep::InjectFault {
                fault_type: FaultType::NodeOffline,
                target: "NodeC".to_string(),
            },
            Self::exchange_to("NodeB"),
            ScenarioStep::Assert {
                condition: AssertCondition::ExchangeFailed {
                    exchange: 0,
                    error_code: "TIMEOUT".to_string(),
                },
            },
            ScenarioStep::ClearFault {
                fault_type: FaultType::NodeOffline,
                target: "NodeC".to_string(),
            },
            Self::balance("NodeA", "USD", 900),
            Self::balance("NodeC", "USD", 100),
            Self::balance("NodeB", "GBP", 0),
        ]);

        Self {
            name: "broker-unresponsive".to_string(),
            description: "Broker never answers the exchange request".to_string(),
            topology: Topology {
                exchange_timeout_ms: 2_000,
                ..Topology::default()
            },
            steps,
        }
    }
}
