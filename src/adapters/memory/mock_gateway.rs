//! Scriptable payment gateway for tests.
//!
//! Provides a configurable implementation of `PaymentGatewayAdapter`.
//! Supports:
//! - Queued initiation outcomes (success or injected error)
//! - Configured cancellation outcome
//! - Call tracking
//!
//! `confirm_payment` accepts a serialized [`PaymentResult`] as its payload,
//! so tests can feed exact outcomes through the callback path.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::json;

use crate::domain::billing::PaymentGateway;
use crate::domain::payment::PaymentResult;
use crate::ports::{
    CancellationContext, GatewayCancellation, GatewayError, GatewayResponse, PaymentContext,
    PaymentGatewayAdapter,
};

/// Mock gateway adapter for testing.
///
/// # Example
///
/// ```ignore
/// let mock = MockGatewayAdapter::mobile_money();
/// mock.fail_next_initiation(GatewayError::transport("timeout"));
/// let err = mock.initiate_payment(&context).await.unwrap_err();
/// assert_eq!(mock.initiations().len(), 1);
/// ```
#[derive(Clone)]
pub struct MockGatewayAdapter {
    gateway: PaymentGateway,
    recurring: bool,
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    /// Outcomes for upcoming `initiate_payment` calls; empty means success.
    initiation_errors: VecDeque<GatewayError>,

    /// Errors applied to every initiation until cleared.
    persistent_error: Option<GatewayError>,

    cancellation: Option<GatewayCancellation>,

    initiations: Vec<PaymentContext>,
    cancellations: Vec<CancellationContext>,
    sequence: u64,
}

impl MockGatewayAdapter {
    pub fn new(gateway: PaymentGateway, recurring: bool) -> Self {
        Self {
            gateway,
            recurring,
            inner: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Mock with mobile-money behavior (scheduler-driven renewals).
    pub fn mobile_money() -> Self {
        Self::new(PaymentGateway::MobileMoney, false)
    }

    /// Mock with card behavior (gateway-driven renewals).
    pub fn card() -> Self {
        Self::new(PaymentGateway::Card, true)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Fail the next initiation with `error`.
    pub fn fail_next_initiation(&self, error: GatewayError) {
        self.state().initiation_errors.push_back(error);
    }

    /// Fail every initiation with `error` until [`Self::clear_errors`].
    pub fn fail_all_initiations(&self, error: GatewayError) {
        self.state().persistent_error = Some(error);
    }

    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.initiation_errors.clear();
        state.persistent_error = None;
    }

    /// Outcome returned by `cancel_subscription`.
    pub fn set_cancellation(&self, outcome: GatewayCancellation) {
        self.state().cancellation = Some(outcome);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Assertions
    // ════════════════════════════════════════════════════════════════════════════

    pub fn initiations(&self) -> Vec<PaymentContext> {
        self.state().initiations.clone()
    }

    pub fn cancellations(&self) -> Vec<CancellationContext> {
        self.state().cancellations.clone()
    }

    /// Transaction id the mock assigned to the n-th initiation (0-based).
    pub fn transaction_id(&self, n: u64) -> String {
        format!("{}_tx_{}", self.gateway.as_str(), n + 1)
    }
}

#[async_trait]
impl PaymentGatewayAdapter for MockGatewayAdapter {
    fn gateway(&self) -> PaymentGateway {
        self.gateway
    }

    async fn initiate_payment(
        &self,
        context: &PaymentContext,
    ) -> Result<GatewayResponse, GatewayError> {
        let mut state = self.state();
        state.initiations.push(context.clone());

        if let Some(error) = state.initiation_errors.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.persistent_error.clone() {
            return Err(error);
        }

        let n = state.sequence;
        state.sequence += 1;
        Ok(GatewayResponse {
            transaction_id: self.transaction_id(n),
            client_secret: match self.gateway {
                PaymentGateway::Card => Some(format!("secret_{}", n + 1)),
                PaymentGateway::MobileMoney => None,
            },
            success: true,
            metadata: json!({ "mock": true }),
        })
    }

    fn confirm_payment(&self, payload: &[u8]) -> Result<PaymentResult, GatewayError> {
        serde_json::from_slice(payload)
            .map_err(|e| GatewayError::invalid_payload(format!("invalid mock payload: {}", e)))
    }

    async fn cancel_subscription(
        &self,
        context: &CancellationContext,
    ) -> Result<GatewayCancellation, GatewayError> {
        let mut state = self.state();
        state.cancellations.push(context.clone());
        Ok(state.cancellation.clone().unwrap_or(if self.recurring {
            GatewayCancellation::Cancelled
        } else {
            GatewayCancellation::Unsupported {
                reason: "unsupported: cancellation is internal only".to_string(),
            }
        }))
    }

    fn supports_recurring(&self) -> bool {
        self.recurring
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{CompanyId, Currency, Money, SubscriptionId};
    use crate::domain::payment::Payable;
    use crate::ports::PayerContact;

    fn context() -> PaymentContext {
        PaymentContext {
            company_id: CompanyId::new(),
            payable: Payable::Subscription(SubscriptionId::new()),
            amount: Money::new(100_000, Currency::kes()),
            reference: "SUB".to_string(),
            description: "Renewal".to_string(),
            idempotency_key: "renewal:1:2".to_string(),
            contact: PayerContact::default(),
        }
    }

    #[tokio::test]
    async fn queued_error_applies_once() {
        let mock = MockGatewayAdapter::mobile_money();
        mock.fail_next_initiation(GatewayError::transport("timeout"));

        assert!(mock.initiate_payment(&context()).await.is_err());
        let ok = mock.initiate_payment(&context()).await.unwrap();
        assert_eq!(ok.transaction_id, mock.transaction_id(0));
        assert_eq!(mock.initiations().len(), 2);
    }

    #[tokio::test]
    async fn confirm_round_trips_result_json() {
        let mock = MockGatewayAdapter::card();
        let result = PaymentResult::failed("pi_9", "declined");
        let parsed = mock
            .confirm_payment(&serde_json::to_vec(&result).unwrap())
            .unwrap();
        assert_eq!(parsed, result);
    }
}
