//! Append-only snapshot log.
//!
//! Every rate change appends a complete [`RateTable`] snapshot under a fixed
//! key. Nothing is ever overwritten; the current table is the most recent
//! snapshot that still parses.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::RateResult;
use crate::table::RateTable;

/// Well-known key a family of snapshots is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogKey([u8; 32]);

impl LogKey {
    /// Key derived as the SHA-256 of `label`.
    pub fn derive(label: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(label.as_bytes());
        Self(hasher.finalize().into())
    }

    /// The key rate snapshots are stored under.
    pub fn rates() -> Self {
        Self::derive("rates")
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Storage for append-only snapshot strings.
pub trait SnapshotLog: Send + Sync {
    /// Append a snapshot under `key`. Returns its 1-based sequence number.
    fn append(&self, key: &LogKey, snapshot: String) -> RateResult<u64>;

    /// All snapshots under `key`, oldest first.
    fn entries(&self, key: &LogKey) -> Vec<String>;
}

/// In-memory snapshot log.
#[derive(Debug, Default)]
pub struct MemorySnapshotLog {
    entries: DashMap<LogKey, Vec<String>>,
}

impl MemorySnapshotLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotLog for MemorySnapshotLog {
    fn append(&self, key: &LogKey, snapshot: String) -> RateResult<u64> {
        let mut entries = self.entries.entry(*key).or_default();
        entries.push(snapshot);
        Ok(entries.len() as u64)
    }

    fn entries(&self, key: &LogKey) -> Vec<String> {
        self.entries
            .get(key)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

/// Rate snapshots under one key of a [`SnapshotLog`].
#[derive(Clone)]
pub struct RateLog {
    log: Arc<dyn SnapshotLog>,
    key: LogKey,
}

impl RateLog {
    /// Rate snapshots under [`LogKey::rates`].
    pub fn new(log: Arc<dyn SnapshotLog>) -> Self {
        Self::with_key(log, LogKey::rates())
    }

    pub fn with_key(log: Arc<dyn SnapshotLog>, key: LogKey) -> Self {
        Self { log, key }
    }

    pub fn key(&self) -> &LogKey {
        &self.key
    }

    /// Append `table` as a new snapshot. Earlier snapshots stay intact.
    pub fn append(&self, table: &RateTable) -> RateResult<u64> {
        let sequence = self.log.append(&self.key, table.to_snapshot()?)?;
        debug!(key = %self.key, sequence, entries = table.len(), "Appended rate snapshot");
        Ok(sequence)
    }

    /// The most recent snapshot that parses, or an empty table when none do.
    pub fn current_snapshot(&self) -> RateTable {
        for (index, raw) in self.log.entries(&self.key).iter().enumerate().rev() {
            match RateTable::from_snapshot(raw) {
                Ok(table) => return table,
                Err(e) => {
                    warn!(key = %self.key, sequence = index + 1, error = %e, "Skipping malformed rate snapshot");
                }
            }
        }
        RateTable::new()
    }

    /// Every snapshot that parses, oldest first.
    pub fn history(&self) -> Vec<RateTable> {
        self.log
            .entries(&self.key)
            .iter()
            .filter_map(|raw| RateTable::from_snapshot(raw).ok())
            .collect()
    }
}

impl fmt::Debug for RateLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLog").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::RateEntry;
    use fxbroker_common::CurrencyCode;
    use rust_decimal_macros::dec;

    fn rate_log() -> (Arc<MemorySnapshotLog>, RateLog) {
        let storage = Arc::new(MemorySnapshotLog::new());
        let log = RateLog::new(storage.clone());
        (storage, log)
    }

    #[test]
    fn test_rates_key() {
        assert_eq!(
            LogKey::rates().to_string(),
            "ff24aad2c015d2e6657f5bf49ca76a3d1c3c3fdfb2e14c06601f415cab77ce4c"
        );
        assert_eq!(LogKey::rates(), LogKey::derive("rates"));
        assert_ne!(LogKey::rates(), LogKey::derive("other"));
    }

    #[test]
    fn test_empty_log_is_empty_table() {
        let (_, log) = rate_log();
        assert!(log.current_snapshot().is_empty());
        assert!(log.history().is_empty());
    }

    #[test]
    fn test_append_keeps_history() {
        let (storage, log) = rate_log();

        let first = RateTable::new().upsert(RateEntry::new("USD", "GBP", dec!(0.2)).unwrap());
        let second = first.clone().upsert(RateEntry::new("USD", "JPY", dec!(0.5)).unwrap());

        assert_eq!(log.append(&first).unwrap(), 1);
        assert_eq!(log.append(&second).unwrap(), 2);

        assert_eq!(log.current_snapshot(), second);
        assert_eq!(log.history(), vec![first, second]);
        assert_eq!(storage.entries(&LogKey::rates()).len(), 2);
    }

    #[test]
    fn test_malformed_latest_falls_back() {
        let (storage, log) = rate_log();
        let good = RateTable::new().upsert(RateEntry::new("USD", "GBP", dec!(0.2)).unwrap());

        log.append(&good).unwrap();
        storage.append(&LogKey::rates(), "{broken".to_string()).unwrap();

        assert_eq!(log.current_snapshot(), good);
        assert_eq!(log.history().len(), 1);
    }

    #[test]
    fn test_only_malformed_is_empty() {
        let (storage, log) = rate_log();
        storage.append(&LogKey::rates(), "garbage".to_string()).unwrap();

        assert!(log.current_snapshot().is_empty());
        assert_eq!(
            log.current_snapshot()
                .rate_or_zero(&CurrencyCode::usd(), &CurrencyCode::gbp()),
            rust_decimal::Decimal::ZERO
        );
    }

    #[test]
    fn test_keys_are_independent() {
        let storage: Arc<dyn SnapshotLog> = Arc::new(MemorySnapshotLog::new());
        let rates = RateLog::new(storage.clone());
        let other = RateLog::with_key(storage, LogKey::derive("other"));

        rates
            .append(&RateTable::new().upsert(RateEntry::new("USD", "GBP", dec!(0.2)).unwrap()))
            .unwrap();

        assert_eq!(rates.current_snapshot().len(), 1);
        assert!(other.current_snapshot().is_empty());
    }
}
