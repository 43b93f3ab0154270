//! Network directory snapshot.
//!
//! A [`Directory`] is an immutable view of every known node and what it
//! advertises. Nodes hold a [`SharedDirectory`] and replace the whole snapshot
//! on refresh instead of mutating peer lists in place.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::capability::{Capability, CapabilityQuery, CapabilitySet, NodeInfo};
use crate::identifiers::Party;

/// Immutable snapshot of the network map.
#[derive(Debug, Clone)]
pub struct Directory {
    nodes: Vec<NodeInfo>,
    taken_at: DateTime<Utc>,
}

impl Directory {
    /// Create a snapshot of the given nodes.
    pub fn new(nodes: Vec<NodeInfo>) -> Self {
        Self {
            nodes,
            taken_at: Utc::now(),
        }
    }

    /// An empty snapshot.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// When this snapshot was taken.
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// All nodes.
    pub fn nodes(&self) -> &[NodeInfo] {
        &self.nodes
    }

    /// Look up a node by party.
    pub fn node(&self, party: &Party) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| &n.party == party)
    }

    /// Look up a party by legal name.
    pub fn party_by_name(&self, name: &str) -> Option<&Party> {
        self.nodes
            .iter()
            .map(|n| &n.party)
            .find(|p| p.name() == name)
    }

    /// Parties advertising a capability.
    pub fn with_capability(&self, capability: &Capability) -> Vec<&Party> {
        self.nodes
            .iter()
            .filter(|n| n.capabilities.contains(capability))
            .map(|n| &n.party)
            .collect()
    }

    /// Parties advertising rate authority.
    pub fn brokers(&self) -> Vec<&Party> {
        self.with_capability(&Capability::Broker)
    }

    /// Parties able to issue currency.
    pub fn issuers(&self) -> Vec<&Party> {
        self.with_capability(&Capability::Issuer)
    }

    /// Notary parties.
    pub fn notaries(&self) -> Vec<&Party> {
        self.with_capability(&Capability::Notary)
    }

    /// Counterparties of `me`: everyone except `me` and notaries.
    pub fn peers_of(&self, me: &Party) -> Vec<&Party> {
        self.nodes
            .iter()
            .filter(|n| &n.party != me && !n.capabilities.contains(&Capability::Notary))
            .map(|n| &n.party)
            .collect()
    }
}

impl CapabilityQuery for Directory {
    fn capabilities(&self, party: &Party) -> Option<&CapabilitySet> {
        self.node(party).map(|n| &n.capabilities)
    }
}

/// Produces fresh directory snapshots (the network map service).
pub trait DirectorySource: Send + Sync {
    /// Take a snapshot of the current network map.
    fn snapshot(&self) -> Directory;
}

/// A node's current directory, swapped wholesale on refresh.
#[derive(Debug)]
pub struct SharedDirectory {
    current: RwLock<Arc<Directory>>,
}

impl SharedDirectory {
    /// Create with an initial snapshot.
    pub fn new(initial: Directory) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// The current snapshot. Callers keep a consistent view for as long as
    /// they hold the returned `Arc`.
    pub fn snapshot(&self) -> Arc<Directory> {
        self.current.read().clone()
    }

    /// Replace the snapshot.
    pub fn replace(&self, next: Directory) {
        *self.current.write() = Arc::new(next);
    }

    /// Replace the snapshot with one taken from `source`.
    pub fn refresh_from(&self, source: &dyn DirectorySource) {
        self.replace(source.snapshot());
    }
}

impl Default for SharedDirectory {
    fn default() -> Self {
        Self::new(Directory::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_directory() -> Directory {
        Directory::new(vec![
            NodeInfo::with_tags(Party::named("NodeA"), ["main.currency.usd"]),
            NodeInfo::with_tags(Party::named("NodeB"), ["main.currency.gbp"]),
            NodeInfo::with_tags(Party::named("NodeC"), ["fx.broker", "settlement.issuer"]),
            NodeInfo::with_tags(Party::named("Controller"), ["settlement.notary"]),
        ])
    }

    #[test]
    fn test_capability_queries() {
        let directory = sample_directory();

        assert_eq!(directory.brokers(), vec![&Party::named("NodeC")]);
        assert_eq!(directory.issuers(), vec![&Party::named("NodeC")]);
        assert_eq!(directory.notaries(), vec![&Party::named("Controller")]);
        assert!(directory
            .capabilities(&Party::named("NodeC"))
            .unwrap()
            .is_broker());
        assert!(directory.capabilities(&Party::named("Nobody")).is_none());
    }

    #[test]
    fn test_peers_exclude_self_and_notaries() {
        let directory = sample_directory();
        let peers = directory.peers_of(&Party::named("NodeA"));

        assert_eq!(peers, vec![&Party::named("NodeB"), &Party::named("NodeC")]);
    }

    #[test]
    fn test_shared_directory_replace() {
        let shared = SharedDirectory::default();
        let before = shared.snapshot();
        assert!(before.nodes().is_empty());

        shared.replace(sample_directory());

        // Old snapshot is untouched
        assert!(before.nodes().is_empty());
        assert_eq!(shared.snapshot().nodes().len(), 4);
        assert!(shared.snapshot().party_by_name("NodeB").is_some());
    }
}
