//! Strongly-typed identifier value objects.
//!
//! Every billing entity is keyed by a UUID wrapped in its own newtype so a
//! `SubscriptionId` can never be passed where an `InvoiceId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_identifier!(
    /// Tenant partition key. Every core operation is scoped by it.
    CompanyId
);

uuid_identifier!(
    /// Platform user that owns the billing relationship.
    UserId
);

uuid_identifier!(
    /// Identifier of a company's subscription to a plan.
    SubscriptionId
);

uuid_identifier!(
    /// Identifier of a pricing tier.
    PlanId
);

uuid_identifier!(
    /// Identifier of a single money movement attempt.
    PaymentId
);

uuid_identifier!(
    /// Identifier of an invoice document.
    InvoiceId
);

uuid_identifier!(
    /// Identifier of a sealed invoice snapshot.
    SnapshotId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_id_generates_unique_values() {
        assert_ne!(SubscriptionId::new(), SubscriptionId::new());
    }

    #[test]
    fn company_id_parses_from_valid_string() {
        let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
        let id: CompanyId = uuid_str.parse().unwrap();
        assert_eq!(id.to_string(), uuid_str);
    }

    #[test]
    fn invoice_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<InvoiceId>().is_err());
    }

    #[test]
    fn payment_id_serializes_transparently() {
        let uuid = Uuid::new_v4();
        let id = PaymentId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
    }
}
