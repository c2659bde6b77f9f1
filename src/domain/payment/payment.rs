//! Payment entity.
//!
//! One row per money movement attempt. Status moves forward only:
//! INITIATED to SUCCESS, FAILED or TIMEOUT. A terminal payment never changes
//! again, whichever path (callback or timeout sweep) settled it first.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

use crate::domain::billing::{AppliedPayment, BillingError, PaymentGateway};
use crate::domain::foundation::{CompanyId, Money, PaymentId, StateMachine, Timestamp};

use super::{Payable, PaymentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Initiated,
    Success,
    Failed,
    Timeout,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Timeout => "timeout",
        }
    }
}

impl StateMachine for PaymentStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, target),
            (Initiated, Success) | (Initiated, Failed) | (Initiated, Timeout)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use PaymentStatus::*;
        match self {
            Initiated => vec![Success, Failed, Timeout],
            Success | Failed | Timeout => vec![],
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(PaymentStatus::Initiated),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            "timeout" => Ok(PaymentStatus::Timeout),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub company_id: CompanyId,
    pub payable: Payable,
    pub amount: Money,
    pub gateway: PaymentGateway,
    pub status: PaymentStatus,

    /// Set at initiation when the gateway answers, or by the confirming callback.
    pub gateway_transaction_id: Option<String>,

    /// Unique across all payments.
    pub idempotency_key: String,

    /// Opaque gateway data, merged from initiation and confirmation.
    pub gateway_metadata: JsonValue,

    pub paid_at: Option<Timestamp>,
    pub failure_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Payment {
    /// The marker a subscription keeps once this payment's outcome is applied.
    pub fn applied(&self) -> AppliedPayment {
        AppliedPayment {
            payment_id: self.id,
            initiated_at: self.created_at,
        }
    }

    /// New INITIATED payment.
    pub fn initiated(
        company_id: CompanyId,
        payable: Payable,
        amount: Money,
        gateway: PaymentGateway,
        idempotency_key: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            company_id,
            payable,
            amount,
            gateway,
            status: PaymentStatus::Initiated,
            gateway_transaction_id: None,
            idempotency_key: idempotency_key.into(),
            gateway_metadata: JsonValue::Object(Default::default()),
            paid_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Terminal payment for a callback the system never initiated.
    pub fn from_confirmation(
        company_id: CompanyId,
        payable: Payable,
        amount: Money,
        gateway: PaymentGateway,
        idempotency_key: impl Into<String>,
        result: &PaymentResult,
        now: Timestamp,
    ) -> Result<Self, BillingError> {
        let mut payment = Self::initiated(company_id, payable, amount, gateway, idempotency_key, now);
        payment.settle(result, now)?;
        Ok(payment)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Records the gateway's transaction id while the payment is still open.
    pub fn attach_gateway_reference(
        &mut self,
        transaction_id: impl Into<String>,
        metadata: &JsonValue,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        if self.is_terminal() {
            return Err(BillingError::idempotency_conflict(&self.idempotency_key));
        }
        self.gateway_transaction_id = Some(transaction_id.into());
        merge_metadata(&mut self.gateway_metadata, metadata);
        self.updated_at = now;
        Ok(())
    }

    /// Moves an INITIATED payment to the outcome's terminal status.
    ///
    /// A terminal payment yields `IdempotencyConflict` and stays untouched.
    pub fn settle(&mut self, result: &PaymentResult, now: Timestamp) -> Result<(), BillingError> {
        let target = result.status.payment_status();
        self.status = self
            .status
            .transition_to(target)
            .map_err(|_| BillingError::idempotency_conflict(&self.idempotency_key))?;
        if self.gateway_transaction_id.is_none() {
            self.gateway_transaction_id = Some(result.gateway_reference.clone());
        }
        merge_metadata(&mut self.gateway_metadata, &result.metadata);
        match target {
            PaymentStatus::Success => self.paid_at = Some(now),
            _ => self.failure_reason = result.failure_reason.clone(),
        }
        self.updated_at = now;
        Ok(())
    }

    /// INITIATED to TIMEOUT. Used only by the timeout sweep.
    pub fn time_out(&mut self, now: Timestamp) -> Result<(), BillingError> {
        self.status = self
            .status
            .transition_to(PaymentStatus::Timeout)
            .map_err(|_| BillingError::idempotency_conflict(&self.idempotency_key))?;
        self.failure_reason = Some("no gateway confirmation before timeout".to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Marks a payment that never reached the gateway.
    pub fn fail_initiation(&mut self, reason: impl Into<String>, now: Timestamp) -> Result<(), BillingError> {
        self.status = self
            .status
            .transition_to(PaymentStatus::Failed)
            .map_err(|_| BillingError::idempotency_conflict(&self.idempotency_key))?;
        self.failure_reason = Some(reason.into());
        self.updated_at = now;
        Ok(())
    }
}

/// Shallow object merge; `incoming` keys win. Non-object values replace.
fn merge_metadata(target: &mut JsonValue, incoming: &JsonValue) {
    if incoming.is_null() {
        return;
    }
    if let (Some(existing), Some(new)) = (target.as_object_mut(), incoming.as_object()) {
        for (k, v) in new {
            existing.insert(k.clone(), v.clone());
        }
        return;
    }
    *target = incoming.clone();
}
