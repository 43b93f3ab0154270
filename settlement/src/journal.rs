//! Journal entry types for double-entry bookkeeping.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use fxbroker_common::{CurrencyCode, IssuedAmount, IssuedToken, Party, SettlementRecordId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Debit entry.
    Debit,
    /// Credit entry.
    Credit,
}

/// Account touched by a journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerAccount {
    /// A party's holding of one issued token.
    Holding { owner: Party, token: IssuedToken },
    /// The issuer's outstanding issuance of one token.
    Issuance { token: IssuedToken },
}

impl LedgerAccount {
    /// Currency of the account.
    pub fn currency(&self) -> &CurrencyCode {
        match self {
            LedgerAccount::Holding { token, .. } | LedgerAccount::Issuance { token } => {
                &token.currency
            }
        }
    }
}

impl fmt::Display for LedgerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerAccount::Holding { owner, token } => write!(f, "{}:{}", owner, token),
            LedgerAccount::Issuance { token } => write!(f, "issuance:{}", token),
        }
    }
}

/// A single journal entry in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Unique entry ID.
    pub id: Uuid,
    /// Record this entry belongs to.
    pub record_id: SettlementRecordId,
    /// Account affected.
    pub account: LedgerAccount,
    /// Entry type (debit or credit).
    pub entry_type: EntryType,
    /// Quantity in minor units.
    pub quantity: u64,
    /// When this entry was created.
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Create a debit entry.
    pub fn debit(record_id: SettlementRecordId, account: LedgerAccount, quantity: u64) -> Self {
        Self::new(record_id, account, EntryType::Debit, quantity)
    }

    /// Create a credit entry.
    pub fn credit(record_id: SettlementRecordId, account: LedgerAccount, quantity: u64) -> Self {
        Self::new(record_id, account, EntryType::Credit, quantity)
    }

    fn new(
        record_id: SettlementRecordId,
        account: LedgerAccount,
        entry_type: EntryType,
        quantity: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            record_id,
            account,
            entry_type,
            quantity,
            created_at: Utc::now(),
        }
    }

    /// Signed quantity (positive for debit).
    pub fn signed_quantity(&self) -> i128 {
        match self.entry_type {
            EntryType::Debit => self.quantity as i128,
            EntryType::Credit => -(self.quantity as i128),
        }
    }
}

/// A batch of journal entries that must be committed together.
#[derive(Debug, Clone)]
pub struct JournalBatch {
    /// Entries in the batch.
    pub entries: Vec<JournalEntry>,
    /// Record ID for the batch.
    pub record_id: SettlementRecordId,
}

impl JournalBatch {
    /// Create a new batch.
    pub fn new(record_id: SettlementRecordId) -> Self {
        Self {
            entries: Vec::new(),
            record_id,
        }
    }

    /// Add an entry to the batch.
    pub fn add_entry(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    /// Debit `from` and credit `to` by the same quantity.
    pub fn transfer(&mut self, from: LedgerAccount, to: LedgerAccount, quantity: u64) {
        self.add_entry(JournalEntry::debit(self.record_id, from, quantity));
        self.add_entry(JournalEntry::credit(self.record_id, to, quantity));
    }

    /// Verify the batch is balanced (debits == credits per currency).
    pub fn is_balanced(&self) -> bool {
        let mut balances: HashMap<&CurrencyCode, i128> = HashMap::new();

        for entry in &self.entries {
            *balances.entry(entry.account.currency()).or_insert(0) += entry.signed_quantity();
        }

        balances.values().all(|&balance| balance == 0)
    }

    /// Get total debits.
    pub fn total_debits(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.entry_type == EntryType::Debit)
            .map(|e| e.quantity)
            .sum()
    }

    /// Get total credits.
    pub fn total_credits(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.entry_type == EntryType::Credit)
            .map(|e| e.quantity)
            .sum()
    }
}

/// What a settlement record did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementKind {
    /// New currency issued onto the ledger.
    Issue,
    /// Existing holdings moved between parties.
    Payment,
    /// Holdings redeemed to their issuer.
    Exit,
}

/// A committed settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: SettlementRecordId,
    pub kind: SettlementKind,
    /// Issuer for an issue, payer for a payment, owner for an exit.
    pub from: Party,
    pub to: Party,
    pub amount: IssuedAmount,
    /// Notary that witnessed an issuance.
    pub notary: Option<Party>,
    pub entries: Vec<JournalEntry>,
    pub recorded_at: DateTime<Utc>,
}

impl SettlementRecord {
    /// Whether the record's entries balance.
    pub fn is_balanced(&self) -> bool {
        JournalBatch {
            entries: self.entries.clone(),
            record_id: self.id,
        }
        .is_balanced()
    }
}
