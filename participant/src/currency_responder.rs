//! Answers currency discovery requests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fxbroker_common::{await_result, CapabilitySet, CurrencyCode, Result};
use fxbroker_protocol::{CurrencyReply, CurrencyRequest, Session};
use fxbroker_settlement::SettlementService;
use tracing::{info, instrument, warn};

use crate::handler::SessionHandler;

/// Currency responder protocol state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrencyResponderState {
    Start,
    Responding(Vec<CurrencyCode>),
    Done,
}

/// Tells an initiator which currencies this node wants to be paid in.
///
/// Currencies the node already holds come first; a node holding nothing
/// falls back to the main currencies it advertises.
pub struct CurrencyResponder {
    settlement: Arc<dyn SettlementService>,
    capabilities: CapabilitySet,
    receive_timeout: Duration,
    settlement_timeout: Duration,
}

impl CurrencyResponder {
    pub fn new(
        settlement: Arc<dyn SettlementService>,
        capabilities: CapabilitySet,
        receive_timeout: Duration,
        settlement_timeout: Duration,
    ) -> Self {
        Self {
            settlement,
            capabilities,
            receive_timeout,
            settlement_timeout,
        }
    }

    /// Currencies this node accepts, most preferred first. Never fails: a
    /// balance query error degrades to the advertised fallback.
    pub async fn accepted_currencies(&self) -> Vec<CurrencyCode> {
        let balances = await_result(
            "balance query",
            self.settlement_timeout,
            self.settlement.balances(),
        )
        .await;

        match balances {
            Ok(balances) => {
                let held: Vec<CurrencyCode> = balances
                    .into_iter()
                    .filter(|(_, quantity)| *quantity > 0)
                    .map(|(currency, _)| currency)
                    .collect();
                if !held.is_empty() {
                    return held;
                }
            }
            Err(e) => {
                warn!(error = %e, "Balance query failed; using advertised currencies");
            }
        }

        self.capabilities.main_currencies()
    }

    /// Run the responder on one session.
    #[instrument(skip(self, session), fields(session_id = %session.id(), initiator = %session.counterparty()))]
    pub async fn respond(&self, session: Session) -> Result<CurrencyResponderState> {
        let mut state = CurrencyResponderState::Start;
        loop {
            state = match state {
                CurrencyResponderState::Start => {
                    session.receive::<CurrencyRequest>(self.receive_timeout).await?;
                    CurrencyResponderState::Responding(self.accepted_currencies().await)
                }
                CurrencyResponderState::Responding(currencies) => {
                    info!(currencies = ?currencies, "Replying with accepted currencies");
                    session.send(CurrencyReply::new(currencies)).await?;
                    CurrencyResponderState::Done
                }
                CurrencyResponderState::Done => return Ok(CurrencyResponderState::Done),
            };
        }
    }
}

#[async_trait]
impl SessionHandler for CurrencyResponder {
    async fn handle(&self, session: Session) -> Result<()> {
        self.respond(session).await.map(|_| ())
    }
}
