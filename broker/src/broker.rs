//! Broker node.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use fxbroker_common::{
    Directory, DirectorySource, ExchangeError, NodeInfo, Party, Result, SharedDirectory,
};
use fxbroker_participant::{spawn_serve_loop, CurrencyResponder, HandlerRegistry};
use fxbroker_protocol::{InboundSession, MessageType, SessionTransport};
use fxbroker_rates::{MemorySnapshotLog, RateEntry, RatePair, RateStore, RateTable, SnapshotLog};
use fxbroker_settlement::SettlementService;

use crate::config::BrokerConfig;
use crate::exchange_responder::ExchangeResponder;
use crate::metrics::BrokerMetrics;
use crate::state::BrokerState;

/// The FX broker.
///
/// Owns the rate store, answers `ExchangeInfo` sessions with payouts and
/// answers currency discovery like any other node.
pub struct Broker {
    /// Configuration.
    config: BrokerConfig,
    /// Identity and advertised capabilities.
    info: NodeInfo,
    /// Settlement handle acting for the broker.
    settlement: Arc<dyn SettlementService>,
    /// Rate store consulted on every exchange.
    rates: Arc<RateStore>,
    /// Directory snapshot used for authorization.
    directory: Arc<SharedDirectory>,
    directory_source: Option<Arc<dyn DirectorySource>>,
    /// Inbound sessions, taken by the serve loop on start.
    inbound: Mutex<Option<mpsc::UnboundedReceiver<InboundSession>>>,
    /// Current broker state.
    state: Arc<RwLock<BrokerState>>,
    metrics: Arc<BrokerMetrics>,
    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,
}

impl Broker {
    /// Start serving exchange and discovery sessions.
    #[instrument(skip(self), fields(broker = %self.info.party))]
    pub async fn start(&self) -> Result<()> {
        info!("Starting broker");

        let inbound = {
            let mut state = self.state.write();
            if *state != BrokerState::Starting {
                return Err(ExchangeError::ConfigurationError(format!(
                    "broker cannot start from {:?}",
                    *state
                )));
            }
            let inbound = self.inbound.lock().take().ok_or_else(|| {
                ExchangeError::ConfigurationError("inbound sessions already consumed".into())
            })?;
            *state = BrokerState::Running;
            inbound
        };

        self.refresh_directory();

        let exchange = ExchangeResponder::new(
            self.config.clone(),
            self.rates.clone(),
            self.directory.clone(),
            self.settlement.clone(),
            self.metrics.clone(),
        );
        let discovery = CurrencyResponder::new(
            self.settlement.clone(),
            self.info.capabilities.clone(),
            self.config.receive_timeout,
            self.config.settlement_timeout,
        );
        let registry = HandlerRegistry::new()
            .register(MessageType::ExchangeInfo, Arc::new(exchange))
            .register(MessageType::CurrencyRequest, Arc::new(discovery));

        spawn_serve_loop(
            self.info.party.clone(),
            inbound,
            registry,
            self.shutdown_tx.subscribe(),
        );
        self.start_directory_refresh_loop();

        info!("Broker started successfully");
        Ok(())
    }

    /// Stop accepting sessions and wait for running exchanges to finish.
    #[instrument(skip(self), fields(broker = %self.info.party))]
    pub async fn stop(&self) {
        info!("Stopping broker");

        *self.state.write() = BrokerState::ShuttingDown;
        let _ = self.shutdown_tx.send(true);

        self.drain_pending_exchanges().await;

        *self.state.write() = BrokerState::Stopped;
        info!("Broker stopped");
    }

    /// Insert or replace a rate on behalf of `caller`.
    pub fn upsert_rate(&self, caller: &Party, entry: RateEntry) -> Result<RateTable> {
        let table = self
            .rates
            .upsert_rate(self.directory.snapshot().as_ref(), caller, entry)?;
        self.metrics.rate_updated();
        Ok(table)
    }

    /// Set the `from -> to` rate as the broker itself.
    pub fn set_rate(&self, from: &str, to: &str, rate: Decimal) -> Result<RateTable> {
        let entry = RateEntry::new(from, to, rate)?;
        self.upsert_rate(&self.info.party, entry)
    }

    /// Remove a rate on behalf of `caller`.
    pub fn remove_rate(&self, caller: &Party, pair: &RatePair) -> Result<RateTable> {
        let table = self
            .rates
            .remove_rate(self.directory.snapshot().as_ref(), caller, pair)?;
        self.metrics.rate_updated();
        Ok(table)
    }

    /// Current rate table, for `caller`.
    pub fn rates(&self, caller: &Party) -> Result<RateTable> {
        Ok(self.rates.rates(self.directory.snapshot().as_ref(), caller)?)
    }

    /// Every rate table snapshot, oldest first, for `caller`.
    pub fn rate_history(&self, caller: &Party) -> Result<Vec<RateTable>> {
        Ok(self.rates.history(self.directory.snapshot().as_ref(), caller)?)
    }

    /// Replace the directory snapshot from the configured source.
    pub fn refresh_directory(&self) {
        if let Some(source) = &self.directory_source {
            self.directory.refresh_from(source.as_ref());
            debug!(broker = %self.info.party, nodes = self.directory.snapshot().nodes().len(), "Directory refreshed");
        }
    }

    pub fn party(&self) -> &Party {
        &self.info.party
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Check if the broker is accepting new exchanges.
    pub fn is_accepting_requests(&self) -> bool {
        self.state.read().accepts_requests()
    }

    /// Get the current broker state.
    pub fn state(&self) -> BrokerState {
        *self.state.read()
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    fn start_directory_refresh_loop(&self) {
        let Some(source) = self.directory_source.clone() else {
            return;
        };
        let directory = self.directory.clone();
        let interval = self.config.directory_refresh_interval;
        let mut shutdown = self.shutdown_tx.subscribe();

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
        });
    }

    async fn drain_pending_exchanges(&self) {
        let drain_timeout = self.config.receive_timeout + self.config.settlement_timeout;

        let drained = tokio::time::timeout(drain_timeout, async {
            loop {
                let pending_count = self.metrics.snapshot().exchanges_active;
                if pending_count == 0 {
                    break;
                }
                debug!(pending_count, "Waiting for pending exchanges to complete");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                pending_count = self.metrics.snapshot().exchanges_active,
                "Exchanges still running after drain timeout"
            );
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Builder for Broker.
pub struct BrokerBuilder {
    config: BrokerConfig,
    info: Option<NodeInfo>,
    transport: Option<(Arc<dyn SessionTransport>, mpsc::UnboundedReceiver<InboundSession>)>,
    settlement: Option<Arc<dyn SettlementService>>,
    rate_log: Option<Arc<dyn SnapshotLog>>,
    directory_source: Option<Arc<dyn DirectorySource>>,
}

impl BrokerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: BrokerConfig::default(),
            info: None,
            transport: None,
            settlement: None,
            rate_log: None,
            directory_source: None,
        }
    }

    /// Set configuration.
    pub fn config(mut self, config: BrokerConfig) -> Self {
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

    /// Set the log rate snapshots are appended to. Defaults to an in-memory
    /// log.
    pub fn rate_log(mut self, log: Arc<dyn SnapshotLog>) -> Self {
        self.rate_log = Some(log);
        self
    }

    /// Set where directory snapshots come from.
    pub fn directory_source(mut self, source: Arc<dyn DirectorySource>) -> Self {
        self.directory_source = Some(source);
        self
    }

    /// Build the broker.
    pub fn build(self) -> Result<Broker> {
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
            return Err(ExchangeError::ConfigurationError(format!(
                "transport and settlement must act for {}",
                info.party
            )));
        }

        if !info.capabilities.is_broker() {
            warn!(broker = %info.party, "Broker does not advertise the broker capability; rate access will be refused");
        }

        let rate_log = self
            .rate_log
            .unwrap_or_else(|| Arc::new(MemorySnapshotLog::new()));

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Broker {
            config: self.config,
            directory: Arc::new(SharedDirectory::new(Directory::new(vec![info.clone()]))),
            info,
            settlement,
            rates: Arc::new(RateStore::new(rate_log)),
            directory_source: self.directory_source,
            inbound: Mutex::new(Some(inbound)),
            state: Arc::new(RwLock::new(BrokerState::Starting)),
            metrics: Arc::new(BrokerMetrics::new()),
            shutdown_tx,
        })
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
