//! Rate table: the value stored in each snapshot.

use std::collections::BTreeMap;

use fxbroker_common::CurrencyCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entry::{RateEntry, RatePair};
use crate::error::{RateError, RateResult};

/// Set of rate entries with at most one entry per ordered pair.
///
/// Serialized as a JSON array of `{"from", "to", "rate"}` objects. When a
/// stored array repeats a pair, the later element wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<RateEntry>", into = "Vec<RateEntry>")]
pub struct RateTable {
    rates: BTreeMap<RatePair, Decimal>,
}

impl RateTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `entry`'s pair, returning the updated
    /// table.
    pub fn upsert(mut self, entry: RateEntry) -> Self {
        self.insert(entry);
        self
    }

    /// Insert or replace in place. Returns the previous rate for the pair.
    pub fn insert(&mut self, entry: RateEntry) -> Option<Decimal> {
        self.rates.insert(entry.pair(), entry.rate)
    }

    /// Remove the entry for a pair. Returns the removed rate.
    pub fn remove(&mut self, pair: &RatePair) -> Option<Decimal> {
        self.rates.remove(pair)
    }

    /// Rate for converting `from` into `to`.
    pub fn lookup_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> RateResult<Decimal> {
        self.rates
            .get(&RatePair::new(from.clone(), to.clone()))
            .copied()
            .ok_or_else(|| RateError::NoRateConfigured {
                from: from.clone(),
                to: to.clone(),
            })
    }

    /// Rate for `from`/`to`, or zero when none is configured.
    pub fn rate_or_zero(&self, from: &CurrencyCode, to: &CurrencyCode) -> Decimal {
        self.lookup_rate(from, to).unwrap_or(Decimal::ZERO)
    }

    /// Whether the table has an entry for `pair`.
    pub fn contains(&self, pair: &RatePair) -> bool {
        self.rates.contains_key(pair)
    }

    /// All entries, ordered by pair.
    pub fn entries(&self) -> Vec<RateEntry> {
        self.rates
            .iter()
            .map(|(pair, rate)| RateEntry {
                from: pair.from.clone(),
                to: pair.to.clone(),
                rate: *rate,
            })
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Encode as a snapshot string.
    pub fn to_snapshot(&self) -> RateResult<String> {
        serde_json::to_string(self).map_err(|e| RateError::Storage(e.to_string()))
    }

    /// Decode a snapshot string.
    pub fn from_snapshot(snapshot: &str) -> RateResult<Self> {
        serde_json::from_str(snapshot).map_err(|e| RateError::MalformedSnapshot(e.to_string()))
    }
}

impl From<Vec<RateEntry>> for RateTable {
    fn from(entries: Vec<RateEntry>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<RateTable> for Vec<RateEntry> {
    fn from(table: RateTable) -> Self {
        table.entries()
    }
}

impl FromIterator<RateEntry> for RateTable {
    fn from_iter<T: IntoIterator<Item = RateEntry>>(iter: T) -> Self {
        iter.into_iter().fold(RateTable::new(), RateTable::upsert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn entry(from: &str, to: &str, rate: Decimal) -> RateEntry {
        RateEntry::new(from, to, rate).unwrap()
    }

    #[test]
    fn test_upsert_replaces_same_pair() {
        let table = RateTable::new()
            .upsert(entry("USD", "GBP", dec!(0.2)))
            .upsert(entry("USD", "GBP", dec!(0.3)));

        assert_eq!(table.len(), 1);
        assert_eq!(
            table.lookup_rate(&CurrencyCode::usd(), &CurrencyCode::gbp()),
            Ok(dec!(0.3))
        );
    }

    #[test]
    fn test_pairs_are_directional() {
        let table = RateTable::new().upsert(entry("USD", "GBP", dec!(0.2)));

        assert!(matches!(
            table.lookup_rate(&CurrencyCode::gbp(), &CurrencyCode::usd()),
            Err(RateError::NoRateConfigured { .. })
        ));
        assert_eq!(
            table.rate_or_zero(&CurrencyCode::gbp(), &CurrencyCode::usd()),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_remove() {
        let mut table = RateTable::new().upsert(entry("USD", "JPY", dec!(0.5)));
        let pair = RatePair::new(CurrencyCode::usd(), CurrencyCode::jpy());

        assert_eq!(table.remove(&pair), Some(dec!(0.5)));
        assert!(table.is_empty());
        assert_eq!(table.remove(&pair), None);
    }

    #[test]
    fn test_snapshot_format() {
        let table = RateTable::new().upsert(entry("USD", "GBP", dec!(0.2)));
        let json = table.to_snapshot().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["from"], "USD");
        assert_eq!(value[0]["to"], "GBP");
        assert_eq!(value[0]["rate"], "0.2");
    }

    #[test]
    fn test_snapshot_later_duplicate_wins() {
        let table = RateTable::from_snapshot(
            r#"[{"from":"USD","to":"GBP","rate":"0.1"},{"from":"usd","to":"gbp","rate":"0.4"}]"#,
        )
        .unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.rate_or_zero(&CurrencyCode::usd(), &CurrencyCode::gbp()), dec!(0.4));
    }

    #[test]
    fn test_malformed_snapshot() {
        assert!(matches!(
            RateTable::from_snapshot("not json"),
            Err(RateError::MalformedSnapshot(_))
        ));
        assert!(matches!(
            RateTable::from_snapshot(r#"[{"from":"USD","to":"GBP","rate":"-2"}]"#),
            Err(RateError::MalformedSnapshot(_))
        ));
    }

    fn arb_code() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["USD", "GBP", "EUR", "JPY", "CHF"]).prop_map(String::from)
    }

    fn arb_entry() -> impl Strategy<Value = RateEntry> {
        (arb_code(), arb_code(), 0u32..10_000u32)
            .prop_map(|(from, to, bp)| entry(&from, &to, Decimal::new(bp as i64, 4)))
    }

    proptest! {
        #[test]
        fn prop_at_most_one_entry_per_pair(entries in prop::collection::vec(arb_entry(), 0..40)) {
            let table: RateTable = entries.iter().cloned().collect();

            let mut pairs: Vec<_> = entries.iter().map(RateEntry::pair).collect();
            pairs.sort();
            pairs.dedup();
            prop_assert_eq!(table.len(), pairs.len());
        }

        #[test]
        fn prop_last_write_wins(entries in prop::collection::vec(arb_entry(), 1..40)) {
            let table: RateTable = entries.iter().cloned().collect();

            for pair in table.entries().iter().map(RateEntry::pair) {
                let last = entries.iter().rev().find(|e| e.pair() == pair).unwrap();
                prop_assert_eq!(table.lookup_rate(&pair.from, &pair.to), Ok(last.rate));
            }
        }

        #[test]
        fn prop_snapshot_preserves_table(entries in prop::collection::vec(arb_entry(), 0..20)) {
            let table: RateTable = entries.into_iter().collect();
            let restored = RateTable::from_snapshot(&table.to_snapshot().unwrap()).unwrap();
            prop_assert_eq!(restored, table);
        }
    }
}
