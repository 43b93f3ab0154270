//! Initiator side of the exchange negotiation.
//!
//! The initiator asks the receiver which currency it wants, pays the broker
//! the requested amount as a fee, then hands the broker an [`ExchangeInfo`]
//! and waits for the payout record.
//!
//! ```text
//! Start -> AwaitingCurrencies -> PayingFee -> AwaitingExchangeResult -> Done
//!   \______________\__________________\_______________\______________-> Failed
//! ```
//!
//! Nothing is retried. A failure after the fee payment leaves the fee with the
//! broker.

use std::sync::Arc;

use fxbroker_common::{
    await_result, CurrencyCode, ExchangeError, IssuedAmount, Party, Result, SettlementRecordId,
};
use fxbroker_protocol::{
    CurrencyReply, CurrencyRequest, ExchangeInfo, ExchangeResult, Session, SessionTransport,
};
use fxbroker_settlement::SettlementService;
use tracing::{error, info, instrument};

use crate::config::ParticipantConfig;

/// What the initiator was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    /// Party that ends up with the payout.
    pub receiver: Party,
    /// Broker that receives the fee and makes the payout.
    pub broker: Party,
    /// Amount paid to the broker.
    pub amount: IssuedAmount,
}

/// Initiator protocol state.
#[derive(Debug, Clone, PartialEq)]
pub enum InitiatorState {
    Start,
    AwaitingCurrencies,
    PayingFee {
        target: CurrencyCode,
    },
    AwaitingExchangeResult {
        target: CurrencyCode,
        fee_payment_id: SettlementRecordId,
    },
    Done(SettlementRecordId),
    Failed(ExchangeError),
}

impl InitiatorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InitiatorState::Done(_) | InitiatorState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            InitiatorState::Start => "Start",
            InitiatorState::AwaitingCurrencies => "AwaitingCurrencies",
            InitiatorState::PayingFee { .. } => "PayingFee",
            InitiatorState::AwaitingExchangeResult { .. } => "AwaitingExchangeResult",
            InitiatorState::Done(_) => "Done",
            InitiatorState::Failed(_) => "Failed",
        }
    }
}

/// One run of the initiator protocol.
pub struct ExchangeInitiator {
    request: ExchangeRequest,
    transport: Arc<dyn SessionTransport>,
    settlement: Arc<dyn SettlementService>,
    config: ParticipantConfig,
    state: InitiatorState,
    discovery: Option<Session>,
    fee_payment_id: Option<SettlementRecordId>,
}

impl ExchangeInitiator {
    pub fn new(
        request: ExchangeRequest,
        transport: Arc<dyn SessionTransport>,
        settlement: Arc<dyn SettlementService>,
        config: ParticipantConfig,
    ) -> Self {
        Self {
            request,
            transport,
            settlement,
            config,
            state: InitiatorState::Start,
            discovery: None,
            fee_payment_id: None,
        }
    }

    pub fn state(&self) -> &InitiatorState {
        &self.state
    }

    /// Fee payment record, once the fee has been paid.
    pub fn fee_payment_id(&self) -> Option<SettlementRecordId> {
        self.fee_payment_id
    }

    /// Drive the protocol to a terminal state. Returns the broker's payout
    /// record on success.
    #[instrument(skip(self), fields(
        receiver = %self.request.receiver,
        broker = %self.request.broker,
        amount = %self.request.amount,
    ))]
    pub async fn run(&mut self) -> Result<SettlementRecordId> {
        while !self.state.is_terminal() {
            let current = std::mem::replace(&mut self.state, InitiatorState::Start);
            let from = current.name();
            let next = self.advance(current).await;
            info!(from, to = next.name(), "Initiator transition");
            self.state = next;
        }
        self.discovery = None;

        match &self.state {
            InitiatorState::Done(record_id) => {
                info!(record_id = %record_id, "Exchange completed");
                Ok(*record_id)
            }
            InitiatorState::Failed(e) => {
                error!(error = %e, code = e.error_code(), fee_paid = self.fee_payment_id.is_some(), "Exchange failed");
                Err(e.clone())
            }
            other => Err(ExchangeError::InternalError(format!(
                "initiator stopped in {}",
                other.name()
            ))),
        }
    }

    async fn advance(&mut self, state: InitiatorState) -> InitiatorState {
        let outcome = match state {
            InitiatorState::Start => self
                .request_currencies()
                .await
                .map(|()| InitiatorState::AwaitingCurrencies),
            InitiatorState::AwaitingCurrencies => self
                .await_currencies()
                .await
                .map(|target| InitiatorState::PayingFee { target }),
            InitiatorState::PayingFee { target } => {
                self.pay_fee().await.map(|fee_payment_id| {
                    InitiatorState::AwaitingExchangeResult {
                        target,
                        fee_payment_id,
                    }
                })
            }
            InitiatorState::AwaitingExchangeResult {
                target,
                fee_payment_id,
            } => self
                .request_exchange(target, fee_payment_id)
                .await
                .map(InitiatorState::Done),
            terminal => Ok(terminal),
        };
        outcome.unwrap_or_else(InitiatorState::Failed)
    }

    async fn request_currencies(&mut self) -> Result<()> {
        let session = Session::open(self.transport.clone(), self.request.receiver.clone());
        session.send(CurrencyRequest).await?;
        self.discovery = Some(session);
        Ok(())
    }

    async fn await_currencies(&mut self) -> Result<CurrencyCode> {
        let session = self.discovery.take().ok_or_else(|| {
            ExchangeError::InternalError("currency discovery session not open".into())
        })?;
        let reply: CurrencyReply = session
            .receive(self.config.currency_discovery_timeout)
            .await?;

        info!(currencies = ?reply.currencies, "Receiver currencies");
        reply
            .preferred()
            .cloned()
            .ok_or_else(|| ExchangeError::NoCurrencySelected(self.request.receiver.clone()))
    }

    async fn pay_fee(&mut self) -> Result<SettlementRecordId> {
        let fee_payment_id = await_result(
            "fee payment",
            self.config.settlement_timeout,
            self.settlement
                .pay(self.request.amount.clone(), &self.request.broker),
        )
        .await?;

        info!(fee_payment_id = %fee_payment_id, "Fee paid to broker");
        self.fee_payment_id = Some(fee_payment_id);
        Ok(fee_payment_id)
    }

    async fn request_exchange(
        &mut self,
        target: CurrencyCode,
        fee_payment_id: SettlementRecordId,
    ) -> Result<SettlementRecordId> {
        let info = ExchangeInfo {
            fee_payment_id,
            receiver: self.request.receiver.clone(),
            amount: self.request.amount.quantity(),
            currency: target,
        };

        let session = Session::open(self.transport.clone(), self.request.broker.clone());
        let result: ExchangeResult = session
            .send_and_receive(info, self.config.exchange_timeout)
            .await?;
        Ok(result.record_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxbroker_common::{CurrencyAmount, IssueRef, NodeInfo};
    use fxbroker_protocol::LocalNetwork;
    use fxbroker_settlement::InMemoryLedger;
    use std::time::Duration;
    use tokio_test::assert_err;

    struct Fixture {
        _network: Arc<LocalNetwork>,
        ledger: Arc<InMemoryLedger>,
        initiator: ExchangeInitiator,
        receiver_inbound: tokio::sync::mpsc::UnboundedReceiver<fxbroker_protocol::InboundSession>,
    }

    async fn fixture() -> Fixture {
        let network = LocalNetwork::new();
        let ledger = InMemoryLedger::new();
        let notary = Party::named("Controller");
        ledger.register_notary(notary.clone());

        let (alice_transport, _) = network.join(NodeInfo::with_tags(Party::named("NodeA"), ["main.currency.usd"]));
        let (_, receiver_inbound) = network.join(NodeInfo::with_tags(Party::named("NodeB"), ["main.currency.gbp"]));
        let _ = network.join(NodeInfo::with_tags(Party::named("NodeC"), ["fx.broker"]));

        let issuer = ledger.client_for(Party::named("NodeC"));
        issuer
            .issue(
                CurrencyAmount::new(1_000, CurrencyCode::usd()),
                IssueRef::default(),
                &Party::named("NodeA"),
                &notary,
            )
            .await
            .unwrap();

        let request = ExchangeRequest {
            receiver: Party::named("NodeB"),
            broker: Party::named("NodeC"),
            amount: CurrencyAmount::new(100, CurrencyCode::usd())
                .issued_by(Party::named("NodeC"), IssueRef::default()),
        };
        let config = ParticipantConfig {
            currency_discovery_timeout: Duration::from_millis(200),
            exchange_timeout: Duration::from_millis(500),
            ..Default::default()
        };

        Fixture {
            initiator: ExchangeInitiator::new(
                request,
                alice_transport,
                Arc::new(ledger.client_for(Party::named("NodeA"))),
                config,
            ),
            _network: network,
            ledger,
            receiver_inbound,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_timeout_fails_before_payment() {
        let mut f = fixture().await;

        let err = assert_err!(f.initiator.run().await);
        assert_eq!(err.error_code(), "TIMEOUT");
        assert_eq!(f.initiator.state(), &InitiatorState::Failed(err));
        assert!(f.initiator.fee_payment_id().is_none());
        assert_eq!(f.ledger.record_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_currency_list() {
        let mut f = fixture().await;

        let mut inbound = f.receiver_inbound;
        let responder = tokio::spawn(async move {
            let session = inbound.recv().await.unwrap().session;
            session.receive::<CurrencyRequest>(Duration::from_secs(1)).await.unwrap();
            session.send(CurrencyReply::default()).await.unwrap();
        });

        let err = assert_err!(f.initiator.run().await);
        responder.await.unwrap();

        assert_eq!(err, ExchangeError::NoCurrencySelected(Party::named("NodeB")));
        assert!(f.initiator.fee_payment_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broker_silence_keeps_fee() {
        let mut f = fixture().await;

        let mut inbound = f.receiver_inbound;
        tokio::spawn(async move {
            let session = inbound.recv().await.unwrap().session;
            session.receive::<CurrencyRequest>(Duration::from_secs(1)).await.unwrap();
            session
                .send(CurrencyReply::new(vec![CurrencyCode::gbp(), CurrencyCode::eur()]))
                .await
                .unwrap();
        });

        let err = assert_err!(f.initiator.run().await);
        assert_eq!(err.error_code(), "TIMEOUT");

        let fee_id = f.initiator.fee_payment_id().unwrap();
        let fee = f.ledger.record(&fee_id).unwrap();
        assert_eq!(fee.to, Party::named("NodeC"));
        assert_eq!(fee.amount.quantity(), 100);
    }
}
