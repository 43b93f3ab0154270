//! In-process network of simulated nodes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rust_decimal::Decimal;
use tracing::info;

use fxbroker_broker::{Broker, BrokerBuilder, BrokerConfig};
use fxbroker_common::{
    CurrencyAmount, CurrencyCode, Directory, DirectorySource, IssueRef, IssuedAmount, NodeInfo,
    Party, SettlementRecordId,
};
use fxbroker_participant::{ParticipantConfig, ParticipantNode, ParticipantNodeBuilder};
use fxbroker_protocol::LocalNetwork;
use fxbroker_settlement::{InMemoryLedger, SettlementRecord, SettlementService};

use crate::scenario::{NodeSpec, Topology};

/// Every node of a [`Topology`], wired to one [`LocalNetwork`] and one
/// [`InMemoryLedger`].
pub struct SimulatedCluster {
    network: Arc<LocalNetwork>,
    ledger: Arc<InMemoryLedger>,
    broker: Broker,
    participants: BTreeMap<String, ParticipantNode>,
}

impl SimulatedCluster {
    /// Join every node to a fresh network and start them.
    pub async fn start(topology: &Topology) -> anyhow::Result<Self> {
        let network = LocalNetwork::new();
        let ledger = InMemoryLedger::new();

        let notary = Party::named(topology.notary.as_str());
        ledger.register_notary(notary.clone());
        let _ = network.join(NodeInfo::with_tags(notary, ["settlement.notary"]));

        let broker_info = node_info(&topology.broker);
        let (transport, inbound) = network.join(broker_info.clone());
        let broker = BrokerBuilder::new()
            .config(BrokerConfig::from_env())
            .info(broker_info.clone())
            .transport(transport, inbound)
            .settlement(Arc::new(ledger.client_for(broker_info.party.clone())))
            .directory_source(network.clone())
            .build()?;

        let participant_config = ParticipantConfig {
            exchange_timeout: Duration::from_millis(topology.exchange_timeout_ms),
            ..ParticipantConfig::from_env()
        };

        let mut participants = BTreeMap::new();
        for spec in &topology.participants {
            let info = node_info(spec);
            let (transport, inbound) = network.join(info.clone());
            let node = ParticipantNodeBuilder::new()
                .config(participant_config.clone())
                .info(info.clone())
                .transport(transport, inbound)
                .settlement(Arc::new(ledger.client_for(info.party.clone())))
                .directory_source(network.clone())
                .build()?;
            participants.insert(spec.name.clone(), node);
        }

        broker.start().await?;
        for node in participants.values() {
            node.start().await?;
        }

        info!(
            broker = %broker.party(),
            participants = participants.len(),
            "Simulated cluster started"
        );

        Ok(Self {
            network,
            ledger,
            broker,
            participants,
        })
    }

    /// Stop every node.
    pub async fn shutdown(&self) {
        for node in self.participants.values() {
            node.stop().await;
        }
        self.broker.stop().await;
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Names of the participant nodes.
    pub fn participant_names(&self) -> Vec<String> {
        self.participants.keys().cloned().collect()
    }

    /// Current network map.
    pub fn directory(&self) -> Directory {
        self.network.snapshot()
    }

    /// Resolve a node name against the network directory.
    pub fn party(&self, name: &str) -> anyhow::Result<Party> {
        self.directory()
            .party_by_name(name)
            .cloned()
            .with_context(|| format!("unknown node {}", name))
    }

    fn participant(&self, name: &str) -> anyhow::Result<&ParticipantNode> {
        self.participants
            .get(name)
            .with_context(|| format!("{} is not a participant", name))
    }

    /// Issue `quantity` of `currency` from `issuer` to `to`.
    pub async fn issue(
        &self,
        issuer: &str,
        to: &str,
        quantity: u64,
        currency: &str,
    ) -> anyhow::Result<SettlementRecordId> {
        let issuer = self.party(issuer)?;
        let to = self.party(to)?;
        let directory = self.directory();
        let notary = directory
            .notaries()
            .first()
            .map(|p| (*p).clone())
            .context("no notary in the network")?;

        let amount = CurrencyAmount::new(quantity, CurrencyCode::new(currency)?);
        Ok(self
            .ledger
            .client_for(issuer)
            .issue(amount, IssueRef::default(), &to, &notary)
            .await?)
    }

    /// Redeem `quantity` of `currency` held by `owner` back to `issuer`.
    pub async fn exit(
        &self,
        owner: &str,
        quantity: u64,
        currency: &str,
        issuer: &str,
    ) -> anyhow::Result<SettlementRecordId> {
        let amount = IssuedAmount::new(
            CurrencyAmount::new(quantity, CurrencyCode::new(currency)?),
            self.party(issuer)?,
            IssueRef::default(),
        );
        let owner = self.party(owner)?;
        Ok(self.ledger.client_for(owner).exit(amount).await?)
    }

    /// Set a rate on the broker.
    pub fn set_rate(&self, from: &str, to: &str, rate: Decimal) -> anyhow::Result<()> {
        self.broker.set_rate(from, to, rate)?;
        Ok(())
    }

    /// Run the initiator protocol on `initiator`. The outer error is a
    /// scenario mistake; the inner result is the protocol outcome.
    pub async fn exchange(
        &self,
        initiator: &str,
        receiver: &str,
        quantity: u64,
        currency: &str,
        issuer: &str,
    ) -> anyhow::Result<fxbroker_common::Result<SettlementRecordId>> {
        let node = self.participant(initiator)?;
        let receiver = self.party(receiver)?;
        let amount = IssuedAmount::new(
            CurrencyAmount::new(quantity, CurrencyCode::new(currency)?),
            self.party(issuer)?,
            IssueRef::default(),
        );

        Ok(node.exchange(&receiver, self.broker.party(), amount).await)
    }

    /// Drop or restore delivery of every message sent to `name`.
    pub fn set_node_offline(&self, name: &str, offline: bool) -> anyhow::Result<()> {
        let party = self.party(name)?;
        self.network.set_offline(&party, offline);
        Ok(())
    }

    /// Make every settlement call fail, or recover.
    pub fn set_ledger_offline(&self, offline: bool) {
        self.ledger.set_offline(offline);
    }

    /// Holding of `name` in `currency`, summed across issuers.
    pub async fn balance(&self, name: &str, currency: &str) -> anyhow::Result<u64> {
        let party = self.party(name)?;
        let currency = CurrencyCode::new(currency)?;
        let balances = self.ledger.client_for(party).balances().await?;
        Ok(balances.get(&currency).copied().unwrap_or(0))
    }

    pub fn record(&self, id: &SettlementRecordId) -> Option<SettlementRecord> {
        self.ledger.record(id)
    }
}

fn node_info(spec: &NodeSpec) -> NodeInfo {
    NodeInfo::with_tags(
        Party::named(spec.name.as_str()),
        spec.tags.iter().map(String::as_str),
    )
}
