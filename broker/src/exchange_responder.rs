//! Broker side of the exchange negotiation.
//!
//! ```text
//! Start -> Computing -> Paying -> Done
//!   \_________\___________\_____-> Failed
//! ```
//!
//! A failed responder sends nothing back; the initiator observes a timeout.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};

use fxbroker_common::{
    await_result, CurrencyAmount, ExchangeError, IssuedAmount, Party, Result, SettlementRecordId,
    SharedDirectory,
};
use fxbroker_participant::SessionHandler;
use fxbroker_protocol::{ExchangeInfo, ExchangeResult, Session};
use fxbroker_rates::{RateError, RateStore};
use fxbroker_settlement::SettlementService;

use crate::config::BrokerConfig;
use crate::metrics::BrokerMetrics;

/// Exchange responder protocol state.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeResponderState {
    Start,
    Computing(ExchangeInfo),
    Paying {
        info: ExchangeInfo,
        payout: IssuedAmount,
    },
    Done(SettlementRecordId),
    Failed(ExchangeError),
}

impl ExchangeResponderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangeResponderState::Done(_) | ExchangeResponderState::Failed(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExchangeResponderState::Start => "Start",
            ExchangeResponderState::Computing(_) => "Computing",
            ExchangeResponderState::Paying { .. } => "Paying",
            ExchangeResponderState::Done(_) => "Done",
            ExchangeResponderState::Failed(_) => "Failed",
        }
    }
}

/// Quantity paid out for `amount` at `rate`: `amount - floor(rate * amount)`.
///
/// NOTE: this subtracts the converted value from the input instead of paying
/// the converted value. A rate of 0.2 on 100 pays 80, a missing rate (zero)
/// pays the full amount.
pub fn compute_payout(amount: u64, rate: Decimal) -> Result<u64> {
    if rate.is_sign_negative() && !rate.is_zero() {
        return Err(ExchangeError::InvalidRate(format!("negative rate {}", rate)));
    }

    let amount_dec = Decimal::from(amount);
    let discount = rate
        .checked_mul(amount_dec)
        .ok_or_else(|| ExchangeError::InvalidRate(format!("rate {} overflows on {}", rate, amount)))?
        .floor();

    if discount > amount_dec {
        return Err(ExchangeError::InvalidRate(format!(
            "rate {} discounts more than {}",
            rate, amount
        )));
    }

    (amount_dec - discount)
        .to_u64()
        .ok_or_else(|| ExchangeError::InvalidRate(format!("payout out of range for rate {}", rate)))
}

/// Pays the receiver named in an [`ExchangeInfo`] out of the broker's own
/// holdings.
pub struct ExchangeResponder {
    party: Party,
    config: BrokerConfig,
    rates: Arc<RateStore>,
    directory: Arc<SharedDirectory>,
    settlement: Arc<dyn SettlementService>,
    metrics: Arc<BrokerMetrics>,
}

impl ExchangeResponder {
    pub fn new(
        config: BrokerConfig,
        rates: Arc<RateStore>,
        directory: Arc<SharedDirectory>,
        settlement: Arc<dyn SettlementService>,
        metrics: Arc<BrokerMetrics>,
    ) -> Self {
        Self {
            party: settlement.party().clone(),
            config,
            rates,
            directory,
            settlement,
            metrics,
        }
    }

    /// Run the responder on one session and return its terminal state.
    #[instrument(skip_all, fields(broker = %self.party, session_id = %session.id(), initiator = %session.counterparty()))]
    pub async fn respond(&self, session: Session) -> ExchangeResponderState {
        self.metrics.exchange_received();

        let mut state = ExchangeResponderState::Start;
        while !state.is_terminal() {
            let from = state.name();
            state = self
                .advance(&session, state)
                .await
                .unwrap_or_else(ExchangeResponderState::Failed);
            info!(from, to = state.name(), "Exchange responder transition");
        }

        match &state {
            ExchangeResponderState::Done(record_id) => {
                info!(record_id = %record_id, "Exchange paid out");
            }
            ExchangeResponderState::Failed(e) => {
                self.metrics.exchange_failed();
                error!(error = %e, code = e.error_code(), "Exchange responder failed");
            }
            _ => {}
        }
        state
    }

    async fn advance(
        &self,
        session: &Session,
        state: ExchangeResponderState,
    ) -> Result<ExchangeResponderState> {
        match state {
            ExchangeResponderState::Start => {
                let info: ExchangeInfo = session.receive(self.config.receive_timeout).await?;
                Ok(ExchangeResponderState::Computing(info))
            }
            ExchangeResponderState::Computing(info) => {
                let payout = self.payout_for(&info)?;
                Ok(ExchangeResponderState::Paying { info, payout })
            }
            ExchangeResponderState::Paying { info, payout } => {
                let quantity = payout.quantity();
                let record_id = await_result(
                    "payout",
                    self.config.settlement_timeout,
                    self.settlement.pay(payout, &info.receiver),
                )
                .await?;

                if let Err(e) = session.send(ExchangeResult { record_id }).await {
                    error!(
                        payout_record = %record_id,
                        receiver = %info.receiver,
                        error = %e,
                        "Payout settled but the result was not delivered"
                    );
                    return Err(e);
                }
                self.metrics.exchange_completed(quantity);
                Ok(ExchangeResponderState::Done(record_id))
            }
            terminal => Ok(terminal),
        }
    }

    fn payout_for(&self, info: &ExchangeInfo) -> Result<IssuedAmount> {
        let directory = self.directory.snapshot();
        let base = &self.config.base_currency;

        let rate = match self
            .rates
            .lookup_rate(directory.as_ref(), &self.party, base, &info.currency)
        {
            Ok(rate) => rate,
            Err(RateError::NoRateConfigured { .. }) => {
                warn!(from = %base, to = %info.currency, "No rate configured; using zero");
                Decimal::ZERO
            }
            Err(e) => return Err(e.into()),
        };

        let quantity = compute_payout(info.amount, rate)?;
        info!(
            fee_payment_id = %info.fee_payment_id,
            receiver = %info.receiver,
            amount = info.amount,
            rate = %rate,
            payout = quantity,
            currency = %info.currency,
            "Payout computed"
        );

        Ok(IssuedAmount::new(
            CurrencyAmount::new(quantity, info.currency.clone()),
            self.party.clone(),
            self.config.issue_ref,
        ))
    }
}

#[async_trait]
impl SessionHandler for ExchangeResponder {
    async fn handle(&self, session: Session) -> Result<()> {
        match self.respond(session).await {
            ExchangeResponderState::Failed(e) => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxbroker_common::{CurrencyCode, Directory, IssueRef, NodeInfo};
    use fxbroker_protocol::{LocalNetwork, SessionTransport};
    use fxbroker_rates::{MemorySnapshotLog, RateEntry};
    use fxbroker_settlement::InMemoryLedger;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_payout_is_discounted() {
        assert_eq!(assert_ok!(compute_payout(100, dec!(0.2))), 80);
        assert_eq!(assert_ok!(compute_payout(100, Decimal::ZERO)), 100);
        assert_eq!(assert_ok!(compute_payout(7, dec!(0.5))), 4);
        assert_eq!(assert_ok!(compute_payout(100, Decimal::ONE)), 0);
    }

    #[test]
    fn test_payout_rejects_bad_rates() {
        let err = assert_err!(compute_payout(100, dec!(1.5)));
        assert_eq!(err.error_code(), "INVALID_RATE");
        assert_err!(compute_payout(100, dec!(-0.1)));
    }

    proptest! {
        #[test]
        fn prop_payout_never_exceeds_amount(amount in 0u64..1_000_000_000, bps in 0u32..=10_000) {
            let rate = Decimal::new(bps as i64, 4);
            let payout = compute_payout(amount, rate).unwrap();
            prop_assert!(payout <= amount);
        }
    }

    struct Fixture {
        _network: Arc<LocalNetwork>,
        ledger: Arc<InMemoryLedger>,
        responder: ExchangeResponder,
        broker_inbound: tokio::sync::mpsc::UnboundedReceiver<fxbroker_protocol::InboundSession>,
        alice: Arc<dyn SessionTransport>,
        metrics: Arc<BrokerMetrics>,
    }

    async fn fixture(rates: &[(&str, &str, Decimal)]) -> Fixture {
        let network = LocalNetwork::new();
        let ledger = InMemoryLedger::new();
        let notary = Party::named("Controller");
        ledger.register_notary(notary.clone());

        let broker_info = NodeInfo::with_tags(Party::named("NodeC"), ["fx.broker"]);
        let (alice, _) = network.join(NodeInfo::with_tags(Party::named("NodeA"), ["main.currency.usd"]));
        let _ = network.join(NodeInfo::with_tags(Party::named("NodeB"), ["main.currency.gbp"]));
        let (_, broker_inbound) = network.join(broker_info.clone());

        let broker = ledger.client_for(Party::named("NodeC"));
        for currency in [CurrencyCode::gbp(), CurrencyCode::jpy()] {
            broker
                .issue(CurrencyAmount::new(1_000, currency), IssueRef::default(), &Party::named("NodeC"), &notary)
                .await
                .unwrap();
        }

        let directory = Arc::new(SharedDirectory::new(Directory::new(vec![broker_info])));
        let store = Arc::new(RateStore::new(Arc::new(MemorySnapshotLog::new())));
        for (from, to, rate) in rates {
            store
                .upsert_rate(directory.snapshot().as_ref(), &Party::named("NodeC"), RateEntry::new(from, to, *rate).unwrap())
                .unwrap();
        }

        let metrics = Arc::new(BrokerMetrics::new());
        let responder = ExchangeResponder::new(
            BrokerConfig {
                receive_timeout: Duration::from_millis(200),
                ..Default::default()
            },
            store,
            directory,
            Arc::new(broker),
            metrics.clone(),
        );

        Fixture {
            _network: network,
            ledger,
            responder,
            broker_inbound,
            alice,
            metrics,
        }
    }

    fn info(quantity: u64, currency: CurrencyCode) -> ExchangeInfo {
        ExchangeInfo {
            fee_payment_id: fxbroker_common::SettlementRecordId::new(),
            receiver: Party::named("NodeB"),
            amount: quantity,
            currency,
        }
    }

    fn gbp_token() -> fxbroker_common::IssuedToken {
        CurrencyAmount::new(1, CurrencyCode::gbp())
            .issued_by(Party::named("NodeC"), IssueRef::default())
            .token()
    }

    #[tokio::test]
    async fn test_pays_discounted_amount() {
        let mut f = fixture(&[("USD", "GBP", dec!(0.2))]).await;

        let session = Session::open(f.alice.clone(), Party::named("NodeC"));
        session.send(info(100, CurrencyCode::gbp())).await.unwrap();
        let inbound = f.broker_inbound.recv().await.unwrap();

        let state = f.responder.respond(inbound.session).await;
        let ExchangeResponderState::Done(record_id) = state else {
            panic!("unexpected state {:?}", state);
        };

        let result: ExchangeResult = session.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(result.record_id, record_id);

        let record = f.ledger.record(&record_id).unwrap();
        assert_eq!(record.to, Party::named("NodeB"));
        assert_eq!(record.amount.quantity(), 80);
        assert_eq!(f.ledger.holding(&Party::named("NodeB"), &gbp_token()), 80);
        assert_eq!(f.metrics.snapshot().payout_volume, 80);
        assert_eq!(f.metrics.snapshot().exchanges_active, 0);
    }

    #[tokio::test]
    async fn test_missing_rate_pays_full_amount() {
        let mut f = fixture(&[("USD", "GBP", dec!(0.2))]).await;

        let session = Session::open(f.alice.clone(), Party::named("NodeC"));
        session.send(info(100, CurrencyCode::jpy())).await.unwrap();
        let inbound = f.broker_inbound.recv().await.unwrap();

        let state = f.responder.respond(inbound.session).await;
        let ExchangeResponderState::Done(record_id) = state else {
            panic!("unexpected state {:?}", state);
        };
        assert_eq!(f.ledger.record(&record_id).unwrap().amount.quantity(), 100);
    }

    #[tokio::test]
    async fn test_insufficient_holdings_fail_silently() {
        let mut f = fixture(&[]).await;

        let session = Session::open(f.alice.clone(), Party::named("NodeC"));
        session.send(info(5_000, CurrencyCode::gbp())).await.unwrap();
        let inbound = f.broker_inbound.recv().await.unwrap();

        let state = f.responder.respond(inbound.session).await;
        assert!(matches!(
            state,
            ExchangeResponderState::Failed(ExchangeError::InsufficientFunds { .. })
        ));
        assert_eq!(f.metrics.snapshot().exchanges_failed, 1);

        let reply = session.receive::<ExchangeResult>(Duration::from_millis(50)).await;
        assert_eq!(assert_err!(reply).error_code(), "TIMEOUT");
    }

    /// Hands out one queued payload and refuses every send.
    struct OneWayTransport {
        party: Party,
        inbox: tokio::sync::Mutex<Option<fxbroker_protocol::Payload>>,
    }

    #[async_trait]
    impl SessionTransport for OneWayTransport {
        fn local_party(&self) -> &Party {
            &self.party
        }

        async fn send(
            &self,
            _session: fxbroker_common::SessionId,
            to: &Party,
            _payload: fxbroker_protocol::Payload,
        ) -> Result<()> {
            Err(ExchangeError::TransportClosed(format!("link to {} down", to)))
        }

        async fn receive(
            &self,
            _session: fxbroker_common::SessionId,
            from: &Party,
            _timeout: Duration,
        ) -> Result<fxbroker_protocol::Payload> {
            self.inbox
                .lock()
                .await
                .take()
                .ok_or_else(|| ExchangeError::Timeout(format!("receive from {}", from)))
        }

        fn close(&self, _session: fxbroker_common::SessionId, _counterparty: &Party) {}
    }

    #[tokio::test]
    async fn test_undelivered_result_keeps_settled_payout() {
        let f = fixture(&[("USD", "GBP", dec!(0.2))]).await;
        let transport = Arc::new(OneWayTransport {
            party: Party::named("NodeC"),
            inbox: tokio::sync::Mutex::new(Some(info(100, CurrencyCode::gbp()).into())),
        });

        let session = Session::open(transport, Party::named("NodeA"));
        let state = f.responder.respond(session).await;
        let ExchangeResponderState::Failed(err) = state else {
            panic!("unexpected state {:?}", state);
        };
        assert_eq!(err.error_code(), "TRANSPORT_CLOSED");

        assert_eq!(f.ledger.holding(&Party::named("NodeB"), &gbp_token()), 80);
        assert_eq!(f.metrics.snapshot().exchanges_failed, 1);
        assert_eq!(f.metrics.snapshot().exchanges_active, 0);
    }

    #[tokio::test]
    async fn test_unauthorized_broker_fails() {
        let mut f = fixture(&[]).await;
        f.responder.directory.replace(Directory::empty());

        let session = Session::open(f.alice.clone(), Party::named("NodeC"));
        session.send(info(100, CurrencyCode::gbp())).await.unwrap();
        let inbound = f.broker_inbound.recv().await.unwrap();

        let state = f.responder.respond(inbound.session).await;
        assert_eq!(
            state,
            ExchangeResponderState::Failed(ExchangeError::NotAuthorized(Party::named("NodeC")))
        );
    }
}
