//! Typed capabilities advertised by network nodes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::identifiers::Party;
use crate::monetary::CurrencyCode;

const BROKER_TAG: &str = "fx.broker";
const ISSUER_TAG: &str = "settlement.issuer";
const NOTARY_TAG: &str = "settlement.notary";
const MAIN_CURRENCY_PREFIX: &str = "main.currency.";

/// A service a node advertises to the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Holds conversion rates and runs the exchange responder.
    Broker,
    /// Issues currency onto the ledger.
    Issuer,
    /// Notarises settlement transactions.
    Notary,
    /// Preferred currency to receive when the node holds no balances.
    MainCurrency(CurrencyCode),
    /// Any other advertised tag, kept verbatim.
    Other(String),
}

impl Capability {
    /// Parse an advertised tag. Unknown or malformed tags become
    /// [`Capability::Other`].
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            BROKER_TAG => Capability::Broker,
            ISSUER_TAG => Capability::Issuer,
            NOTARY_TAG => Capability::Notary,
            _ => tag
                .strip_prefix(MAIN_CURRENCY_PREFIX)
                .and_then(|code| CurrencyCode::new(code).ok())
                .map(Capability::MainCurrency)
                .unwrap_or_else(|| Capability::Other(tag.to_string())),
        }
    }

    /// The tag this capability is advertised under.
    pub fn tag(&self) -> String {
        match self {
            Capability::Broker => BROKER_TAG.to_string(),
            Capability::Issuer => ISSUER_TAG.to_string(),
            Capability::Notary => NOTARY_TAG.to_string(),
            Capability::MainCurrency(code) => format!("{}{}", MAIN_CURRENCY_PREFIX, code),
            Capability::Other(tag) => tag.clone(),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// The set of capabilities one node advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Build a set from advertised tags.
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Self {
        Self(tags.into_iter().map(Capability::from_tag).collect())
    }

    /// Add a capability.
    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    /// Check for a capability.
    pub fn contains(&self, capability: &Capability) -> bool {
        self.0.contains(capability)
    }

    /// Whether the node advertises rate authority.
    pub fn is_broker(&self) -> bool {
        self.contains(&Capability::Broker)
    }

    /// Main currencies, sorted by code.
    pub fn main_currencies(&self) -> Vec<CurrencyCode> {
        self.0
            .iter()
            .filter_map(|c| match c {
                Capability::MainCurrency(code) => Some(code.clone()),
                _ => None,
            })
            .collect()
    }

    /// Iterate capabilities.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A node's identity together with what it advertises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub party: Party,
    pub capabilities: CapabilitySet,
}

impl NodeInfo {
    /// Create node info.
    pub fn new(party: Party, capabilities: CapabilitySet) -> Self {
        Self {
            party,
            capabilities,
        }
    }

    /// Create node info from advertised tags.
    pub fn with_tags<'a>(party: Party, tags: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(party, CapabilitySet::from_tags(tags))
    }
}

/// Answers "what does this party advertise?" from already-known metadata.
pub trait CapabilityQuery {
    /// Capabilities of `party`, or `None` if the party is unknown.
    fn capabilities(&self, party: &Party) -> Option<&CapabilitySet>;
}
