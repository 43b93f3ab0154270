//! FxBroker Settlement
//!
//! The settlement service contract used by the exchange protocol, and an
//! in-memory double-entry ledger implementing it for simulation and tests.

pub mod journal;
pub mod ledger;
pub mod service;

pub use journal::{EntryType, JournalBatch, JournalEntry, LedgerAccount, SettlementKind, SettlementRecord};
pub use ledger::{InMemoryLedger, LedgerHandle};
pub use service::SettlementService;
