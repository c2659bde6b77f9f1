//! Payment gateways and the country rule that selects one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// Gateway family servicing a subscription or payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentGateway {
    /// Push-based mobile money (M-Pesa STK).
    MobileMoney,

    /// Pull-based card billing (Stripe).
    Card,
}

impl PaymentGateway {
    /// Kenya is billed through mobile money; everyone else by card.
    pub fn for_country(country: &CountryCode) -> Self {
        if country.is_kenya() {
            PaymentGateway::MobileMoney
        } else {
            PaymentGateway::Card
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentGateway::MobileMoney => "mobile_money",
            PaymentGateway::Card => "card",
        }
    }
}

impl fmt::Display for PaymentGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentGateway {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mobile_money" => Ok(PaymentGateway::MobileMoney),
            "card" => Ok(PaymentGateway::Card),
            other => Err(format!("unknown payment gateway '{}'", other)),
        }
    }
}

/// ISO 3166-1 alpha-2 country code, uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode(String);

impl CountryCode {
    pub fn new(code: impl AsRef<str>) -> Result<Self, ValidationError> {
        let code = code.as_ref().trim();
        if code.is_empty() {
            return Err(ValidationError::empty_field("country"));
        }
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::invalid_format(
                "country",
                "must be a two-letter ISO code",
            ));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn kenya() -> Self {
        Self("KE".to_string())
    }

    pub fn is_kenya(&self) -> bool {
        self.0 == "KE"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CountryCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CountryCode::new(value)
    }
}

impl From<CountryCode> for String {
    fn from(c: CountryCode) -> Self {
        c.0
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kenya_maps_to_mobile_money() {
        let ke = CountryCode::new("ke").unwrap();
        assert_eq!(PaymentGateway::for_country(&ke), PaymentGateway::MobileMoney);
    }

    #[test]
    fn other_countries_map_to_card() {
        for code in ["US", "UG", "TZ", "GB"] {
            let country = CountryCode::new(code).unwrap();
            assert_eq!(PaymentGateway::for_country(&country), PaymentGateway::Card);
        }
    }

    #[test]
    fn country_code_rejects_invalid() {
        assert!(CountryCode::new("").is_err());
        assert!(CountryCode::new("KEN").is_err());
        assert!(CountryCode::new("1E").is_err());
    }

    #[test]
    fn gateway_string_round_trip() {
        for gateway in [PaymentGateway::MobileMoney, PaymentGateway::Card] {
            assert_eq!(gateway.as_str().parse::<PaymentGateway>(), Ok(gateway));
        }
    }
}
