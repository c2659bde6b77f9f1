//! Money value object.
//!
//! Amounts are held as integer minor units (cents) paired with an ISO-4217
//! currency code. Arithmetic between different currencies is rejected.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ValidationError;

/// Three-letter uppercase ISO-4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Validates and wraps a currency code. Lowercase input is accepted.
    pub fn new(code: impl AsRef<str>) -> Result<Self, ValidationError> {
        let code = code.as_ref().trim();
        if code.is_empty() {
            return Err(ValidationError::empty_field("currency"));
        }
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::invalid_format(
                "currency",
                "must be a three-letter ISO code",
            ));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Kenyan shilling.
    pub fn kes() -> Self {
        Self("KES".to_string())
    }

    /// US dollar.
    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(value)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An amount of a single currency in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount_minor: i64,
    currency: Currency,
}

impl Money {
    pub fn new(amount_minor: i64, currency: Currency) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    pub fn amount_minor(&self) -> i64 {
        self.amount_minor
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn is_positive(&self) -> bool {
        self.amount_minor > 0
    }

    /// Whole major units, rounded up. 1000.01 KES becomes 1001.
    pub fn major_units_ceil(&self) -> i64 {
        let whole = self.amount_minor.div_euclid(100);
        if self.amount_minor.rem_euclid(100) == 0 {
            whole
        } else {
            whole + 1
        }
    }

    /// Adds two amounts of the same currency.
    pub fn checked_add(&self, other: &Money) -> Result<Money, ValidationError> {
        self.ensure_same_currency(other)?;
        self.amount_minor
            .checked_add(other.amount_minor)
            .map(|sum| Money::new(sum, self.currency.clone()))
            .ok_or_else(|| ValidationError::invalid_format("amount", "overflow"))
    }

    /// Subtracts an amount of the same currency.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, ValidationError> {
        self.ensure_same_currency(other)?;
        self.amount_minor
            .checked_sub(other.amount_minor)
            .map(|diff| Money::new(diff, self.currency.clone()))
            .ok_or_else(|| ValidationError::invalid_format("amount", "overflow"))
    }

    /// Multiplies by a quantity.
    pub fn checked_mul(&self, quantity: i64) -> Result<Money, ValidationError> {
        self.amount_minor
            .checked_mul(quantity)
            .map(|product| Money::new(product, self.currency.clone()))
            .ok_or_else(|| ValidationError::invalid_format("amount", "overflow"))
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), ValidationError> {
        if self.currency != other.currency {
            return Err(ValidationError::invalid_format(
                "currency",
                format!("cannot combine {} with {}", self.currency, other.currency),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount_minor < 0 { "-" } else { "" };
        let abs = self.amount_minor.unsigned_abs();
        write!(f, "{} {}{}.{:02}", self.currency, sign, abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_normalizes_case() {
        assert_eq!(Currency::new("kes").unwrap().as_str(), "KES");
    }

    #[test]
    fn currency_rejects_bad_codes() {
        assert!(Currency::new("").is_err());
        assert!(Currency::new("KE").is_err());
        assert!(Currency::new("K3S").is_err());
    }

    #[test]
    fn major_units_round_up() {
        assert_eq!(Money::new(100_000, Currency::kes()).major_units_ceil(), 1000);
        assert_eq!(Money::new(100_001, Currency::kes()).major_units_ceil(), 1001);
        assert_eq!(Money::new(1, Currency::kes()).major_units_ceil(), 1);
        assert_eq!(Money::new(0, Currency::kes()).major_units_ceil(), 0);
    }

    #[test]
    fn add_rejects_mixed_currencies() {
        let kes = Money::new(100, Currency::kes());
        let usd = Money::new(100, Currency::usd());
        assert!(kes.checked_add(&usd).is_err());
    }

    #[test]
    fn arithmetic_in_same_currency() {
        let a = Money::new(2_500, Currency::usd());
        let b = Money::new(1_000, Currency::usd());
        assert_eq!(a.checked_add(&b).unwrap().amount_minor(), 3_500);
        assert_eq!(a.checked_sub(&b).unwrap().amount_minor(), 1_500);
        assert_eq!(b.checked_mul(3).unwrap().amount_minor(), 3_000);
    }

    #[test]
    fn display_formats_minor_units() {
        assert_eq!(Money::new(100_050, Currency::kes()).to_string(), "KES 1000.50");
        assert_eq!(Money::new(-5, Currency::usd()).to_string(), "USD -0.05");
    }

    #[test]
    fn serde_rejects_invalid_currency() {
        let json = r#"{"amount_minor":100,"currency":"dollars"}"#;
        assert!(serde_json::from_str::<Money>(json).is_err());
    }
}
