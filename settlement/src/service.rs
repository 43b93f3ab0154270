//! Settlement service contract.

use std::collections::BTreeMap;

use async_trait::async_trait;
use fxbroker_common::{CurrencyAmount, CurrencyCode, IssueRef, IssuedAmount, Party, Result, SettlementRecordId};

/// A node's handle on the settlement layer. The node the handle belongs to is
/// the implicit issuer or payer of every call.
#[async_trait]
pub trait SettlementService: Send + Sync {
    /// The party this handle acts for.
    fn party(&self) -> &Party;

    /// Issue `amount` to `to`, witnessed by `notary`.
    ///
    /// Fails with `SettlementFailure` when the notary is unknown or the
    /// quantity is zero.
    async fn issue(
        &self,
        amount: CurrencyAmount,
        reference: IssueRef,
        to: &Party,
        notary: &Party,
    ) -> Result<SettlementRecordId>;

    /// Pay `amount` to `to`.
    ///
    /// Fails with `InsufficientFunds` when the payer's holding of the exact
    /// issued token is short, and with `SettlementFailure` for a zero amount or
    /// a payment to oneself.
    async fn pay(&self, amount: IssuedAmount, to: &Party) -> Result<SettlementRecordId>;

    /// Redeem `amount` back to its issuer, removing it from circulation.
    ///
    /// Fails with `InsufficientFunds` when the holding of the exact issued
    /// token is short.
    async fn exit(&self, amount: IssuedAmount) -> Result<SettlementRecordId>;

    /// Non-zero holdings per currency, summed across issuers.
    async fn balances(&self) -> Result<BTreeMap<CurrencyCode, u64>>;
}
