//! Participant node.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, instrument, warn};

use fxbroker_common::{
    await_result, CurrencyAmount, CurrencyCode, Directory, DirectorySource, ExchangeError,
    IssueRef, IssuedAmount, NodeInfo, Party, Result, SettlementRecordId, SharedDirectory,
};
use fxbroker_protocol::{InboundSession, MessageType, SessionTransport};
use fxbroker_settlement::SettlementService;

use crate::config::ParticipantConfig;
use crate::currency_responder::CurrencyResponder;
use crate::handler::{spawn_serve_loop, HandlerRegistry};
use crate::initiator::{ExchangeInitiator, ExchangeRequest};

/// Node lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Built but not serving.
    Created,
    /// Serving inbound sessions.
    Running,
    /// Stopped; cannot be restarted.
    Stopped,
}

/// A participant in the FX network.
///
/// Serves currency discovery for its counterparties and initiates exchanges
/// on request.
pub struct ParticipantNode {
    config: ParticipantConfig,
    info: NodeInfo,
    transport: Arc<dyn SessionTransport>,
    settlement: Arc<dyn SettlementService>,
    directory: Arc<SharedDirectory>,
    directory_source: Option<Arc<dyn DirectorySource>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<InboundSession>>>,
    state: Arc<RwLock<NodeState>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ParticipantNode {
    /// Start serving: refresh the directory, then spawn the serve loop and
    /// the directory refresh loop.
    #[instrument(skip(self), fields(party = %self.info.party))]
    pub async fn start(&self) -> Result<()> {
        let inbound = {
            let mut state = self.state.write().await;
            if *state != NodeState::Created {
                return Err(ExchangeError::ConfigurationError(format!(
                    "node cannot start from {:?}",
                    *state
                )));
            }
            let inbound = self.inbound.lock().take().ok_or_else(|| {
                ExchangeError::ConfigurationError("inbound sessions already consumed".into())
            })?;
            *state = NodeState::Running;
            inbound
        };

        self.refresh_directory();

        let responder = CurrencyResponder::new(
            self.settlement.clone(),
            self.info.capabilities.clone(),
            self.config.responder_receive_timeout,
            self.config.settlement_timeout,
        );
        let registry =
            HandlerRegistry::new().register(MessageType::CurrencyRequest, Arc::new(responder));
        spawn_serve_loop(
            self.info.party.clone(),
            inbound,
            registry,
            self.shutdown_tx.subscribe(),
        );

        self.start_directory_refresh_loop();

        info!("Participant node started");
        Ok(())
    }

    /// Stop serving. Running protocol instances finish on their own.
    #[instrument(skip(self), fields(party = %self.info.party))]
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        *self.state.write().await = NodeState::Stopped;
        info!("Participant node stopped");
    }

    /// Run the initiator protocol: pay `amount` to `broker` as a fee and have
    /// the broker pay `receiver` in the receiver's preferred currency.
    #[instrument(skip(self, amount), fields(party = %self.info.party, amount = %amount))]
    pub async fn exchange(
        &self,
        receiver: &Party,
        broker: &Party,
        amount: IssuedAmount,
    ) -> Result<SettlementRecordId> {
        let request = ExchangeRequest {
            receiver: receiver.clone(),
            broker: broker.clone(),
            amount,
        };
        ExchangeInitiator::new(
            request,
            self.transport.clone(),
            self.settlement.clone(),
            self.config.clone(),
        )
        .run()
        .await
    }

    /// Issue currency to `to`. The node acts as issuer.
    pub async fn issue(
        &self,
        amount: CurrencyAmount,
        reference: IssueRef,
        to: &Party,
        notary: &Party,
    ) -> Result<SettlementRecordId> {
        await_result(
            "issue",
            self.config.settlement_timeout,
            self.settlement.issue(amount, reference, to, notary),
        )
        .await
    }

    /// Pay `amount` to `to`.
    pub async fn pay(&self, amount: IssuedAmount, to: &Party) -> Result<SettlementRecordId> {
        await_result(
            "payment",
            self.config.settlement_timeout,
            self.settlement.pay(amount, to),
        )
        .await
    }

    /// Holdings per currency.
    pub async fn balances(&self) -> Result<BTreeMap<CurrencyCode, u64>> {
        await_result(
            "balance query",
            self.config.settlement_timeout,
            self.settlement.balances(),
        )
        .await
    }

    /// Replace the directory snapshot from the configured source.
    pub fn refresh_directory(&self) {
        if let Some(source) = &self.directory_source {
            self.directory.refresh_from(source.as_ref());
            debug!(party = %self.info.party, nodes = self.directory.snapshot().nodes().len(), "Directory refreshed");
        }
    }

    /// Current directory snapshot.
    pub fn directory(&self) -> Arc<Directory> {
        self.directory.snapshot()
    }

    /// Counterparties, excluding this node and notaries.
    pub fn peers(&self) -> Vec<Party> {
        self.directory()
            .peers_of(&self.info.party)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Parties advertising rate authority.
    pub fn brokers(&self) -> Vec<Party> {
        self.directory().brokers().into_iter().cloned().collect()
    }

    /// Notaries.
    pub fn notaries(&self) -> Vec<Party> {
        self.directory().notaries().into_iter().cloned().collect()
    }

    pub fn party(&self) -> &Party {
        &self.info.party
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn config(&self) -> &ParticipantConfig {
        &self.config
    }

    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    fn start_directory_refresh_loop(&self) {
        let Some(source) = self.directory_source.clone() else {
            return;
        };
        let directory = self.directory.clone();
        let interval = self.config.directory_refresh_interval;
        let mut shutdown = self.shutdown_tx.subscribe();
        let party = self.info.party.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        directory.refresh_from(source.as_ref());
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(party = %party, "Directory refresh loop stopped");
        });
    }
}

impl Drop for ParticipantNode {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Builder for ParticipantNode.
pub struct ParticipantNodeBuilder {
    config: ParticipantConfig,
    info: Option<NodeInfo>,
    transport: Option<(Arc<dyn SessionTransport>, mpsc::UnboundedReceiver<InboundSession>)>,
    settlement: Option<Arc<dyn SettlementService>>,
    directory_source: Option<Arc<dyn DirectorySource>>,
}

impl ParticipantNodeBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: ParticipantConfig::default(),
            info: None,
            transport: None,
            settlement: None,
            directory_source: None,
        }
    }

    /// Set configuration.
    pub fn config(mut self, config: ParticipantConfig) -> Self {
        self.config = config;
        self
    }

    /// Set identity and advertised capabilities.
    pub fn info(mut self, info: NodeInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Set the transport and its inbound session stream.
    pub fn transport(
        mut self,
        transport: Arc<dyn SessionTransport>,
        inbound: mpsc::UnboundedReceiver<InboundSession>,
    ) -> Self {
        self.transport = Some((transport, inbound));
        self
    }

    /// Set the settlement service handle.
    pub fn settlement(mut self, settlement: Arc<dyn SettlementService>) -> Self {
        self.settlement = Some(settlement);
        self
    }

    /// Set where directory snapshots come from.
    pub fn directory_source(mut self, source: Arc<dyn DirectorySource>) -> Self {
        self.directory_source = Some(source);
        self
    }

    /// Build the node.
    pub fn build(self) -> Result<ParticipantNode> {
        self.config
            .validate()
            .map_err(ExchangeError::ConfigurationError)?;

        let info = self
            .info
            .ok_or(ExchangeError::ConfigurationError("Node info is required".to_string()))?;

        let (transport, inbound) = self
            .transport
            .ok_or(ExchangeError::ConfigurationError("Transport is required".to_string()))?;

        let settlement = self
            .settlement
            .ok_or(ExchangeError::ConfigurationError("Settlement service is required".to_string()))?;

        if transport.local_party() != &info.party || settlement.party() != &info.party {
            warn!(party = %info.party, "Transport or settlement handle belongs to another party");
            return Err(ExchangeError::ConfigurationError(format!(
                "transport and settlement must act for {}",
                info.party
            )));
        }

        let (shutdown_tx, _) = watch::channel(false);
        Ok(ParticipantNode {
            config: self.config,
            info,
            transport,
            settlement,
            directory: Arc::new(SharedDirectory::default()),
            directory_source: self.directory_source,
            inbound: Mutex::new(Some(inbound)),
            state: Arc::new(RwLock::new(NodeState::Created)),
            shutdown_tx,
        })
    }
}

impl Default for ParticipantNodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
