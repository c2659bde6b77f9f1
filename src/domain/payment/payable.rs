//! What a payment pays for.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::foundation::{InvoiceId, SubscriptionId};

/// Target of a payment. Only invoices take part in paid-status recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Payable {
    Subscription(SubscriptionId),
    Invoice(InvoiceId),
}

impl Payable {
    /// Discriminator stored alongside the id.
    pub fn payable_type(&self) -> &'static str {
        match self {
            Payable::Subscription(_) => "subscription",
            Payable::Invoice(_) => "invoice",
        }
    }

    pub fn payable_id(&self) -> Uuid {
        match self {
            Payable::Subscription(id) => *id.as_uuid(),
            Payable::Invoice(id) => *id.as_uuid(),
        }
    }

    /// Rebuilds a payable from its stored `(type, id)` pair.
    pub fn from_parts(payable_type: &str, id: Uuid) -> Result<Self, String> {
        match payable_type {
            "subscription" => Ok(Payable::Subscription(SubscriptionId::from_uuid(id))),
            "invoice" => Ok(Payable::Invoice(InvoiceId::from_uuid(id))),
            other => Err(format!("unknown payable type '{}'", other)),
        }
    }

    pub fn as_subscription(&self) -> Option<SubscriptionId> {
        match self {
            Payable::Subscription(id) => Some(*id),
            Payable::Invoice(_) => None,
        }
    }

    pub fn as_invoice(&self) -> Option<InvoiceId> {
        match self {
            Payable::Invoice(id) => Some(*id),
            Payable::Subscription(_) => None,
        }
    }
}

impl fmt::Display for Payable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.payable_type(), self.payable_id())
    }
}
