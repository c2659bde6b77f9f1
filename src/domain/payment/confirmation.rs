//! Normalized gateway callback outcome.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::foundation::{CompanyId, Money};

use super::{Payable, PaymentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Confirmed,
    Failed,
}

impl ConfirmationStatus {
    /// Terminal payment status this outcome settles to.
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            ConfirmationStatus::Confirmed => PaymentStatus::Success,
            ConfirmationStatus::Failed => PaymentStatus::Failed,
        }
    }
}

/// Outcome parsed from a gateway callback.
///
/// `gateway_reference` is the id the gateway returned at initiation (checkout
/// request id, payment intent id) or, for gateway-driven renewals, the gateway
/// invoice id. The optional attribution fields are filled when the callback
/// itself carries them; they let the ledger create a payment the system never
/// initiated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub status: ConfirmationStatus,
    pub gateway_reference: String,
    pub metadata: JsonValue,
    pub failure_reason: Option<String>,
    pub idempotency_key: Option<String>,
    pub company_id: Option<CompanyId>,
    pub payable: Option<Payable>,
    pub amount: Option<Money>,
    pub gateway_subscription_id: Option<String>,
}

impl PaymentResult {
    pub fn confirmed(gateway_reference: impl Into<String>) -> Self {
        Self::new(ConfirmationStatus::Confirmed, gateway_reference.into(), None)
    }

    pub fn failed(gateway_reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            ConfirmationStatus::Failed,
            gateway_reference.into(),
            Some(reason.into()),
        )
    }

    fn new(status: ConfirmationStatus, gateway_reference: String, failure_reason: Option<String>) -> Self {
        Self {
            status,
            gateway_reference,
            metadata: JsonValue::Object(Default::default()),
            failure_reason,
            idempotency_key: None,
            company_id: None,
            payable: None,
            amount: None,
            gateway_subscription_id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_attribution(mut self, company_id: CompanyId, payable: Payable) -> Self {
        self.company_id = Some(company_id);
        self.payable = Some(payable);
        self
    }

    pub fn with_amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_gateway_subscription(mut self, id: impl Into<String>) -> Self {
        self.gateway_subscription_id = Some(id.into());
        self
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == ConfirmationStatus::Confirmed
    }
}
