//! In-memory ledger.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use fxbroker_common::{
    CurrencyAmount, CurrencyCode, ExchangeError, IssueRef, IssuedAmount, IssuedToken, Party,
    Result, SettlementRecordId,
};

use crate::journal::{JournalBatch, JournalEntry, LedgerAccount, SettlementKind, SettlementRecord};
use crate::service::SettlementService;

#[derive(Debug, Default)]
struct LedgerState {
    holdings: HashMap<(Party, IssuedToken), u64>,
    records: HashMap<SettlementRecordId, SettlementRecord>,
    journal: Vec<JournalEntry>,
    notaries: HashSet<Party>,
}

impl LedgerState {
    fn holding(&self, owner: &Party, token: &IssuedToken) -> u64 {
        self.holdings
            .get(&(owner.clone(), token.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// `owner`'s holding after receiving `quantity`, or `SettlementFailure`
    /// when it would not fit.
    fn credited(&self, owner: &Party, token: &IssuedToken, quantity: u64) -> Result<u64> {
        self.holding(owner, token).checked_add(quantity).ok_or_else(|| {
            ExchangeError::SettlementFailure(format!("holding of {} in {} would overflow", owner, token))
        })
    }

    fn commit(&mut self, record: SettlementRecord) -> SettlementRecordId {
        let id = record.id;
        self.journal.extend(record.entries.iter().cloned());
        self.records.insert(id, record);
        id
    }
}

/// Ledger shared by every node of a simulated network.
///
/// Each operation runs under one lock, so a payment either moves the whole
/// amount or nothing.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    offline: AtomicBool,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Accept `notary` as a witness for issuance.
    pub fn register_notary(&self, notary: Party) {
        info!(notary = %notary, "Registered notary");
        self.state.lock().notaries.insert(notary);
    }

    /// Make every call fail with `SettlementFailure` until switched back.
    pub fn set_offline(&self, offline: bool) {
        warn!(offline, "Ledger availability changed");
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Whether the ledger is refusing calls.
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Handle acting for `party`.
    pub fn client_for(self: &Arc<Self>, party: Party) -> LedgerHandle {
        LedgerHandle {
            ledger: Arc::clone(self),
            party,
        }
    }

    /// Look up a committed record.
    pub fn record(&self, id: &SettlementRecordId) -> Option<SettlementRecord> {
        self.state.lock().records.get(id).cloned()
    }

    /// Number of committed records.
    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    /// `owner`'s holding of one issued token.
    pub fn holding(&self, owner: &Party, token: &IssuedToken) -> u64 {
        self.state.lock().holding(owner, token)
    }

    /// Every journal entry, in commit order.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().journal.clone()
    }

    /// Verify every committed record balances.
    pub fn verify_integrity(&self) -> bool {
        self.state.lock().records.values().all(SettlementRecord::is_balanced)
    }

    fn ensure_online(&self) -> Result<()> {
        if self.is_offline() {
            return Err(ExchangeError::SettlementFailure("ledger unavailable".into()));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(issuer = %issuer, to = %to))]
    fn issue_as(
        &self,
        issuer: &Party,
        amount: CurrencyAmount,
        reference: IssueRef,
        to: &Party,
        notary: &Party,
    ) -> Result<SettlementRecordId> {
        self.ensure_online()?;
        if amount.is_zero() {
            return Err(ExchangeError::SettlementFailure("cannot issue a zero amount".into()));
        }

        let issued = amount.issued_by(issuer.clone(), reference);
        let token = issued.token();
        let id = SettlementRecordId::new();

        let mut state = self.state.lock();
        if !state.notaries.contains(notary) {
            return Err(ExchangeError::SettlementFailure(format!("unknown notary {}", notary)));
        }

        let credited = state.credited(to, &token, issued.quantity())?;

        let mut batch = JournalBatch::new(id);
        batch.transfer(
            LedgerAccount::Issuance {
                token: token.clone(),
            },
            LedgerAccount::Holding {
                owner: to.clone(),
                token: token.clone(),
            },
            issued.quantity(),
        );

        state.holdings.insert((to.clone(), token), credited);
        let record = SettlementRecord {
            id,
            kind: SettlementKind::Issue,
            from: issuer.clone(),
            to: to.clone(),
            amount: issued,
            notary: Some(notary.clone()),
            entries: batch.entries,
            recorded_at: Utc::now(),
        };
        debug!(record_id = %id, to = %to, amount = %record.amount, "Issued");
        Ok(state.commit(record))
    }

    #[instrument(skip_all, fields(payer = %payer, to = %to))]
    fn pay_as(&self, payer: &Party, amount: IssuedAmount, to: &Party) -> Result<SettlementRecordId> {
        self.ensure_online()?;
        if amount.quantity() == 0 {
            return Err(ExchangeError::SettlementFailure("cannot pay a zero amount".into()));
        }
        if payer == to {
            return Err(ExchangeError::SettlementFailure("payer and payee are the same party".into()));
        }

        let token = amount.token();
        let id = SettlementRecordId::new();

        let mut state = self.state.lock();
        let available = state.holding(payer, &token);
        if available < amount.quantity() {
            return Err(ExchangeError::InsufficientFunds {
                required: amount.quantity(),
                available,
            });
        }

        let credited = state.credited(to, &token, amount.quantity())?;

        let mut batch = JournalBatch::new(id);
        batch.transfer(
            LedgerAccount::Holding {
                owner: payer.clone(),
                token: token.clone(),
            },
            LedgerAccount::Holding {
                owner: to.clone(),
                token: token.clone(),
            },
            amount.quantity(),
        );

        let payer_key = (payer.clone(), token.clone());
        let remaining = available - amount.quantity();
        if remaining == 0 {
            state.holdings.remove(&payer_key);
        } else {
            state.holdings.insert(payer_key, remaining);
        }
        state.holdings.insert((to.clone(), token), credited);

        let record = SettlementRecord {
            id,
            kind: SettlementKind::Payment,
            from: payer.clone(),
            to: to.clone(),
            amount,
            notary: None,
            entries: batch.entries,
            recorded_at: Utc::now(),
        };
        debug!(record_id = %id, to = %to, amount = %record.amount, "Paid");
        Ok(state.commit(record))
    }

    #[instrument(skip_all, fields(owner = %owner))]
    fn exit_as(&self, owner: &Party, amount: IssuedAmount) -> Result<SettlementRecordId> {
        self.ensure_online()?;
        if amount.quantity() == 0 {
            return Err(ExchangeError::SettlementFailure("cannot exit a zero amount".into()));
        }

        let token = amount.token();
        let id = SettlementRecordId::new();

        let mut state = self.state.lock();
        let available = state.holding(owner, &token);
        if available < amount.quantity() {
            return Err(ExchangeError::InsufficientFunds {
                required: amount.quantity(),
                available,
            });
        }

        let mut batch = JournalBatch::new(id);
        batch.transfer(
            LedgerAccount::Holding {
                owner: owner.clone(),
                token: token.clone(),
            },
            LedgerAccount::Issuance {
                token: token.clone(),
            },
            amount.quantity(),
        );

        let owner_key = (owner.clone(), token.clone());
        let remaining = available - amount.quantity();
        if remaining == 0 {
            state.holdings.remove(&owner_key);
        } else {
            state.holdings.insert(owner_key, remaining);
        }

        let record = SettlementRecord {
            id,
            kind: SettlementKind::Exit,
            from: owner.clone(),
            to: token.issuer.clone(),
            amount,
            notary: None,
            entries: batch.entries,
            recorded_at: Utc::now(),
        };
        debug!(record_id = %id, issuer = %record.to, amount = %record.amount, "Exited");
        Ok(state.commit(record))
    }

    fn balances_of(&self, owner: &Party) -> Result<BTreeMap<CurrencyCode, u64>> {
        self.ensure_online()?;

        let state = self.state.lock();
        let mut balances: BTreeMap<CurrencyCode, u64> = BTreeMap::new();
        for ((holder, token), quantity) in &state.holdings {
            if holder == owner && *quantity > 0 {
                let total = balances.entry(token.currency.clone()).or_insert(0);
                *total = total.saturating_add(*quantity);
            }
        }
        Ok(balances)
    }
}

/// [`SettlementService`] acting for one party on an [`InMemoryLedger`].
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    ledger: Arc<InMemoryLedger>,
    party: Party,
}

impl LedgerHandle {
    /// The underlying ledger.
    pub fn ledger(&self) -> &Arc<InMemoryLedger> {
        &self.ledger
    }
}

#[async_trait]
impl SettlementService for LedgerHandle {
    fn party(&self) -> &Party {
        &self.party
    }

    async fn issue(
        &self,
        amount: CurrencyAmount,
        reference: IssueRef,
        to: &Party,
        notary: &Party,
    ) -> Result<SettlementRecordId> {
        self.ledger.issue_as(&self.party, amount, reference, to, notary)
    }

    async fn pay(&self, amount: IssuedAmount, to: &Party) -> Result<SettlementRecordId> {
        self.ledger.pay_as(&self.party, amount, to)
    }

    async fn exit(&self, amount: IssuedAmount) -> Result<SettlementRecordId> {
        self.ledger.exit_as(&self.party, amount)
    }

    async fn balances(&self) -> Result<BTreeMap<CurrencyCode, u64>> {
        self.ledger.balances_of(&self.party)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        ledger: Arc<InMemoryLedger>,
        issuer: LedgerHandle,
        alice: LedgerHandle,
        notary: Party,
    }

    fn fixture() -> Fixture {
        let ledger = InMemoryLedger::new();
        let notary = Party::named("Controller");
        ledger.register_notary(notary.clone());
        Fixture {
            issuer: ledger.client_for(Party::named("NodeC")),
            alice: ledger.client_for(Party::named("NodeA")),
            ledger,
            notary,
        }
    }

    fn usd(quantity: u64) -> CurrencyAmount {
        CurrencyAmount::new(quantity, CurrencyCode::usd())
    }

    #[tokio::test]
    async fn test_issue_and_balances() {
        let f = fixture();

        let id = assert_ok!(
            f.issuer
                .issue(usd(500), IssueRef::default(), f.alice.party(), &f.notary)
                .await
        );

        let balances = assert_ok!(f.alice.balances().await);
        assert_eq!(balances.get(&CurrencyCode::usd()), Some(&500));

        let record = f.ledger.record(&id).unwrap();
        assert_eq!(record.kind, SettlementKind::Issue);
        assert_eq!(record.notary, Some(f.notary.clone()));
        assert!(record.is_balanced());
    }

    #[tokio::test]
    async fn test_issue_requires_known_notary() {
        let f = fixture();

        let err = assert_err!(
            f.issuer
                .issue(usd(10), IssueRef::default(), f.alice.party(), &Party::named("Nobody"))
                .await
        );
        assert_eq!(err.error_code(), "SETTLEMENT_FAILURE");

        let err = assert_err!(
            f.issuer
                .issue(usd(0), IssueRef::default(), f.alice.party(), &f.notary)
                .await
        );
        assert_eq!(err.error_code(), "SETTLEMENT_FAILURE");
        assert_eq!(f.ledger.record_count(), 0);
    }

    #[tokio::test]
    async fn test_pay_moves_exact_token() {
        let f = fixture();
        let bob = f.ledger.client_for(Party::named("NodeB"));
        f.issuer
            .issue(usd(100), IssueRef::default(), f.alice.party(), &f.notary)
            .await
            .unwrap();

        let amount = usd(40).issued_by(f.issuer.party().clone(), IssueRef::default());
        assert_ok!(f.alice.pay(amount.clone(), bob.party()).await);

        assert_eq!(f.ledger.holding(f.alice.party(), &amount.token()), 60);
        assert_eq!(f.ledger.holding(bob.party(), &amount.token()), 40);
        assert!(f.ledger.verify_integrity());

        // Same currency under a different reference is a different token
        let other_ref = usd(10).issued_by(f.issuer.party().clone(), IssueRef(2));
        let err = assert_err!(f.alice.pay(other_ref, bob.party()).await);
        assert_eq!(
            err,
            ExchangeError::InsufficientFunds {
                required: 10,
                available: 0
            }
        );
    }

    #[tokio::test]
    async fn test_pay_validation() {
        let f = fixture();
        f.issuer
            .issue(usd(100), IssueRef::default(), f.alice.party(), &f.notary)
            .await
            .unwrap();
        let token_of = |q| usd(q).issued_by(f.issuer.party().clone(), IssueRef::default());

        let err = assert_err!(f.alice.pay(token_of(0), f.issuer.party()).await);
        assert_eq!(err.error_code(), "SETTLEMENT_FAILURE");

        let err = assert_err!(f.alice.pay(token_of(5), f.alice.party()).await);
        assert_eq!(err.error_code(), "SETTLEMENT_FAILURE");

        let err = assert_err!(f.alice.pay(token_of(101), f.issuer.party()).await);
        assert_eq!(err.error_code(), "INSUFFICIENT_FUNDS");
    }

    #[tokio::test]
    async fn test_balances_sum_across_issuers() {
        let f = fixture();
        let other_issuer = f.ledger.client_for(Party::named("NodeD"));

        f.issuer
            .issue(usd(30), IssueRef::default(), f.alice.party(), &f.notary)
            .await
            .unwrap();
        other_issuer
            .issue(usd(20), IssueRef::default(), f.alice.party(), &f.notary)
            .await
            .unwrap();

        let balances = f.alice.balances().await.unwrap();
        assert_eq!(balances.get(&CurrencyCode::usd()), Some(&50));
        assert!(f.issuer.balances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_issue_overflow_leaves_holding_untouched() {
        let f = fixture();
        f.issuer
            .issue(usd(u64::MAX), IssueRef::default(), f.alice.party(), &f.notary)
            .await
            .unwrap();

        let err = assert_err!(
            f.issuer
                .issue(usd(1), IssueRef::default(), f.alice.party(), &f.notary)
                .await
        );
        assert_eq!(err.error_code(), "SETTLEMENT_FAILURE");

        let token = usd(1).issued_by(f.issuer.party().clone(), IssueRef::default()).token();
        assert_eq!(f.ledger.holding(f.alice.party(), &token), u64::MAX);
        assert_eq!(f.ledger.record_count(), 1);
    }

    #[tokio::test]
    async fn test_pay_overflow_leaves_both_holdings_untouched() {
        let f = fixture();
        let bob = f.ledger.client_for(Party::named("NodeB"));
        f.issuer
            .issue(usd(u64::MAX), IssueRef::default(), f.alice.party(), &f.notary)
            .await
            .unwrap();
        f.issuer
            .issue(usd(5), IssueRef::default(), bob.party(), &f.notary)
            .await
            .unwrap();

        let amount = usd(1).issued_by(f.issuer.party().clone(), IssueRef::default());
        let err = assert_err!(bob.pay(amount.clone(), f.alice.party()).await);
        assert_eq!(err.error_code(), "SETTLEMENT_FAILURE");

        assert_eq!(f.ledger.holding(bob.party(), &amount.token()), 5);
        assert_eq!(f.ledger.holding(f.alice.party(), &amount.token()), u64::MAX);
        assert_eq!(f.ledger.record_count(), 2);
    }

    #[tokio::test]
    async fn test_balances_saturate_across_issuers() {
        let f = fixture();
        let other_issuer = f.ledger.client_for(Party::named("NodeD"));

        f.issuer
            .issue(usd(u64::MAX), IssueRef::default(), f.alice.party(), &f.notary)
            .await
            .unwrap();
        other_issuer
            .issue(usd(1), IssueRef::default(), f.alice.party(), &f.notary)
            .await
            .unwrap();

        let balances = assert_ok!(f.alice.balances().await);
        assert_eq!(balances.get(&CurrencyCode::usd()), Some(&u64::MAX));
    }

    #[tokio::test]
    async fn test_exit_returns_holding_to_issuer() {
        let f = fixture();
        f.issuer
            .issue(usd(100), IssueRef::default(), f.alice.party(), &f.notary)
            .await
            .unwrap();

        let amount = usd(30).issued_by(f.issuer.party().clone(), IssueRef::default());
        let id = assert_ok!(f.alice.exit(amount.clone()).await);
        assert_eq!(f.ledger.holding(f.alice.party(), &amount.token()), 70);

        let record = f.ledger.record(&id).unwrap();
        assert_eq!(record.kind, SettlementKind::Exit);
        assert_eq!(&record.to, f.issuer.party());
        assert!(record.is_balanced());

        let journal = f.ledger.journal();
        assert_eq!(journal.len(), 4);
        assert!(journal[2..]
            .iter()
            .all(|entry| entry.record_id == id && entry.quantity == 30));
        assert_eq!(
            journal[3].account,
            LedgerAccount::Issuance {
                token: amount.token()
            }
        );

        let err = assert_err!(f.alice.exit(usd(71).issued_by(f.issuer.party().clone(), IssueRef::default())).await);
        assert_eq!(err.error_code(), "INSUFFICIENT_FUNDS");

        let rest = usd(70).issued_by(f.issuer.party().clone(), IssueRef::default());
        assert_ok!(f.alice.exit(rest).await);
        assert!(f.alice.balances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_ledger_fails_calls() {
        let f = fixture();
        f.ledger.set_offline(true);

        let err = assert_err!(f.alice.balances().await);
        assert_eq!(err.error_code(), "SETTLEMENT_FAILURE");
        assert!(err.is_retryable());

        f.ledger.set_offline(false);
        assert_ok!(f.alice.balances().await);
    }
}
