//! Directional conversion rate entries.

use std::fmt;
use std::hash::{Hash, Hasher};

use fxbroker_common::CurrencyCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{RateError, RateResult};

/// Ordered currency pair. `USD/GBP` and `GBP/USD` are different pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RatePair {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
}

impl RatePair {
    /// Create a new pair.
    pub fn new(from: CurrencyCode, to: CurrencyCode) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for RatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.from, self.to)
    }
}

/// One configured rate.
///
/// Identity is the `(from, to)` pair only: two entries for the same pair are
/// equal whatever their rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StoredEntry")]
pub struct RateEntry {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub rate: Decimal,
}

impl RateEntry {
    /// Create an entry from raw currency codes.
    pub fn new(from: &str, to: &str, rate: Decimal) -> RateResult<Self> {
        let from = CurrencyCode::new(from).map_err(|_| RateError::InvalidCurrency(from.into()))?;
        let to = CurrencyCode::new(to).map_err(|_| RateError::InvalidCurrency(to.into()))?;
        Self::for_pair(RatePair::new(from, to), rate)
    }

    /// Create an entry for an already validated pair.
    pub fn for_pair(pair: RatePair, rate: Decimal) -> RateResult<Self> {
        if rate.is_sign_negative() && !rate.is_zero() {
            return Err(RateError::InvalidRate(format!("{} for {} is negative", rate, pair)));
        }
        Ok(Self {
            from: pair.from,
            to: pair.to,
            rate,
        })
    }

    /// The identity of this entry.
    pub fn pair(&self) -> RatePair {
        RatePair::new(self.from.clone(), self.to.clone())
    }
}

impl PartialEq for RateEntry {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from && self.to == other.to
    }
}

impl Eq for RateEntry {}

impl Hash for RateEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.from.hash(state);
        self.to.hash(state);
    }
}

impl fmt::Display for RateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}={}", self.from, self.to, self.rate)
    }
}

#[derive(Deserialize)]
struct StoredEntry {
    from: CurrencyCode,
    to: CurrencyCode,
    rate: Decimal,
}

impl TryFrom<StoredEntry> for RateEntry {
    type Error = RateError;

    fn try_from(stored: StoredEntry) -> Result<Self, Self::Error> {
        RateEntry::for_pair(RatePair::new(stored.from, stored.to), stored.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    #[test]
    fn test_entry_normalizes_case() {
        let lower = RateEntry::new("usd", "gbp", dec!(0.2)).unwrap();
        let upper = RateEntry::new("USD", "GBP", dec!(0.2)).unwrap();

        assert_eq!(lower, upper);
        assert_eq!(lower.from.code(), "USD");
        assert_eq!(lower.to.code(), "GBP");
    }

    #[test]
    fn test_identity_ignores_rate() {
        let a = RateEntry::new("USD", "GBP", dec!(0.2)).unwrap();
        let b = RateEntry::new("USD", "GBP", dec!(0.5)).unwrap();
        let reversed = RateEntry::new("GBP", "USD", dec!(0.2)).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, reversed);

        let set: HashSet<_> = [a, b, reversed].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_rejects_negative_rate() {
        assert!(matches!(
            RateEntry::new("USD", "GBP", dec!(-0.1)),
            Err(RateError::InvalidRate(_))
        ));
        assert!(RateEntry::new("USD", "GBP", dec!(0)).is_ok());
    }

    #[test]
    fn test_rejects_bad_currency() {
        assert!(matches!(
            RateEntry::new("US", "GBP", dec!(0.1)),
            Err(RateError::InvalidCurrency(_))
        ));
    }

    #[test]
    fn test_deserialize_validates() {
        let entry: RateEntry =
            serde_json::from_str(r#"{"from":"usd","to":"jpy","rate":"0.5"}"#).unwrap();
        assert_eq!(entry.from, CurrencyCode::usd());
        assert_eq!(entry.rate, dec!(0.5));

        assert!(serde_json::from_str::<RateEntry>(r#"{"from":"usd","to":"jpy","rate":"-1"}"#).is_err());
    }
}
