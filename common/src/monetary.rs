//! Monetary types for the FX broker protocol.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ExchangeError;
use crate::identifiers::Party;

/// ISO-style three letter currency code, always stored in uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Create a currency code, normalizing to uppercase.
    pub fn new(code: &str) -> Result<Self, ExchangeError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ExchangeError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Common currencies
    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn eur() -> Self {
        Self("EUR".to_string())
    }

    pub fn gbp() -> Self {
        Self("GBP".to_string())
    }

    pub fn jpy() -> Self {
        Self("JPY".to_string())
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CurrencyCode {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = ExchangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

/// A non-negative integer quantity of a currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyAmount {
    /// Quantity in the currency's smallest tracked unit.
    pub quantity: u64,
    /// Currency of the amount.
    pub currency: CurrencyCode,
}

impl CurrencyAmount {
    /// Create a new amount.
    pub fn new(quantity: u64, currency: CurrencyCode) -> Self {
        Self { quantity, currency }
    }

    /// Create a zero amount in the given currency.
    pub fn zero(currency: CurrencyCode) -> Self {
        Self::new(0, currency)
    }

    /// Check if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.quantity == 0
    }

    /// Attach issuer provenance to this amount.
    pub fn issued_by(self, issuer: Party, reference: IssueRef) -> IssuedAmount {
        IssuedAmount::new(self, issuer, reference)
    }
}

impl fmt::Display for CurrencyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.quantity, self.currency)
    }
}

/// Opaque issuance reference byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueRef(pub u8);

impl Default for IssueRef {
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

/// The fungible token an issued amount is denominated in: a currency
/// together with the party that issued it and the issuance reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssuedToken {
    pub currency: CurrencyCode,
    pub issuer: Party,
    pub reference: IssueRef,
}

impl fmt::Display for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} issued by {}[{}]", self.currency, self.issuer, self.reference)
    }
}

/// An amount with issuer provenance, as moved by the settlement layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssuedAmount {
    /// Face amount.
    pub amount: CurrencyAmount,
    /// Issuing party.
    pub issuer: Party,
    /// Issuance reference.
    pub reference: IssueRef,
}

impl IssuedAmount {
    /// Create a new issued amount.
    pub fn new(amount: CurrencyAmount, issuer: Party, reference: IssueRef) -> Self {
        Self {
            amount,
            issuer,
            reference,
        }
    }

    /// Quantity of the amount.
    pub fn quantity(&self) -> u64 {
        self.amount.quantity
    }

    /// Currency of the amount.
    pub fn currency(&self) -> &CurrencyCode {
        &self.amount.currency
    }

    /// The token this amount is denominated in.
    pub fn token(&self) -> IssuedToken {
        IssuedToken {
            currency: self.amount.currency.clone(),
            issuer: self.issuer.clone(),
            reference: self.reference,
        }
    }
}

impl fmt::Display for IssuedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} issued by {}[{}]", self.amount, self.issuer, self.reference)
    }
}
