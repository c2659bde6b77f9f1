//! HandleGatewayCallbackHandler - Applies a gateway callback end to end.
//!
//! 1. Verify the signature over the raw body
//! 2. Let the adapter normalize the body into a [`PaymentResult`]
//! 3. Resolve what was paid for (card renewals arrive keyed by the gateway
//!    subscription id)
//! 4. Record the outcome in the ledger
//! 5. Drive the subscription state machine or notify the invoice owner
//!
//! Replayed callbacks stop at step 4: the ledger reports the payment as
//! already terminal and nothing else happens. The exception is a subscription
//! payment whose outcome never reached the subscription because an earlier
//! delivery failed after the ledger write; step 5 runs again for it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::billing::{
    BillingError, BodySignatureVerifier, CallbackSignatureError, PaymentGateway,
    PaymentTransition, SubscriptionStatus, TimestampedSignatureVerifier,
};
use crate::domain::foundation::{InvoiceId, PaymentId, SubscriptionId, Timestamp};
use crate::domain::payment::{Payable, Payment, PaymentResult, PaymentStatus};
use crate::ports::{BillingNotice, NoticeSubject, Notifier, SubscriptionRepository};

use super::{GatewayRegistry, PaymentLedger, RecordPaymentCommand, SubscriptionStateMachine};

/// Signature scheme for one gateway's callbacks.
#[derive(Clone)]
pub enum CallbackVerifier {
    /// Hex HMAC of the body in a single header.
    Body(BodySignatureVerifier),
    /// `t=..,v1=..` over `"{t}.{body}"` with a replay window.
    Timestamped(TimestampedSignatureVerifier),
}

impl CallbackVerifier {
    pub fn verify(
        &self,
        body: &[u8],
        header: Option<&str>,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        let verified = match self {
            CallbackVerifier::Body(verifier) => verifier.verify(body, header),
            CallbackVerifier::Timestamped(verifier) => {
                verifier.verify_at(body, header, now.as_unix_secs())
            }
        };
        verified.map_err(signature_error)
    }
}

fn signature_error(err: CallbackSignatureError) -> BillingError {
    match err {
        CallbackSignatureError::MissingSecret => BillingError::configuration(err.to_string()),
        other => BillingError::invalid_signature(other.to_string()),
    }
}

/// A raw callback as it came off the wire.
#[derive(Debug, Clone)]
pub struct HandleGatewayCallbackCommand {
    pub gateway: PaymentGateway,
    pub payload: Vec<u8>,
    pub signature: Option<String>,
}

/// What a callback changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The payment was already terminal. Nothing changed.
    Duplicate { payment_id: PaymentId },

    /// A confirmed payment moved its subscription.
    SubscriptionUpdated {
        subscription_id: SubscriptionId,
        transition: PaymentTransition,
    },

    /// A failed renewal moved its subscription into GRACE.
    SubscriptionInGrace { subscription_id: SubscriptionId },

    /// The payment was recorded but the subscription could not take it.
    SubscriptionUnchanged {
        subscription_id: SubscriptionId,
        reason: String,
    },

    /// A failed payment with no subscription change.
    PaymentFailed { payment_id: PaymentId },

    InvoicePayment { invoice_id: InvoiceId, paid: bool },
}

impl CallbackOutcome {
    /// Human-readable summary for the callback response.
    pub fn message(&self) -> String {
        match self {
            CallbackOutcome::Duplicate { .. } => "Callback already processed".to_string(),
            CallbackOutcome::SubscriptionUpdated { transition, .. } => match transition {
                PaymentTransition::Activated => "Subscription activated".to_string(),
                PaymentTransition::Renewed => "Subscription renewed".to_string(),
                PaymentTransition::Recovered => "Subscription recovered".to_string(),
            },
            CallbackOutcome::SubscriptionInGrace { .. } => {
                "Payment failed; subscription in grace period".to_string()
            }
            CallbackOutcome::SubscriptionUnchanged { reason, .. } => {
                format!("Payment recorded; subscription unchanged: {}", reason)
            }
            CallbackOutcome::PaymentFailed { .. } => "Payment failure recorded".to_string(),
            CallbackOutcome::InvoicePayment { paid: true, .. } => "Invoice paid".to_string(),
            CallbackOutcome::InvoicePayment { paid: false, .. } => {
                "Invoice payment recorded".to_string()
            }
        }
    }
}

pub struct HandleGatewayCallbackHandler {
    verifiers: HashMap<PaymentGateway, CallbackVerifier>,
    gateways: GatewayRegistry,
    subscriptions: Arc<dyn SubscriptionRepository>,
    ledger: Arc<PaymentLedger>,
    state_machine: Arc<SubscriptionStateMachine>,
    notifier: Arc<dyn Notifier>,
}

impl HandleGatewayCallbackHandler {
    pub fn new(
        gateways: GatewayRegistry,
        subscriptions: Arc<dyn SubscriptionRepository>,
        ledger: Arc<PaymentLedger>,
        state_machine: Arc<SubscriptionStateMachine>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            verifiers: HashMap::new(),
            gateways,
            subscriptions,
            ledger,
            state_machine,
            notifier,
        }
    }

    pub fn with_verifier(mut self, gateway: PaymentGateway, verifier: CallbackVerifier) -> Self {
        self.verifiers.insert(gateway, verifier);
        self
    }

    pub async fn handle(
        &self,
        cmd: HandleGatewayCallbackCommand,
        now: Timestamp,
    ) -> Result<CallbackOutcome, BillingError> {
        let gateway = cmd.gateway;

        // 1. Signature first; an unverified body is never parsed
        let verifier = self.verifiers.get(&gateway).ok_or_else(|| {
            BillingError::configuration(format!("no callback secret configured for {}", gateway))
        })?;
        if let Err(e) = verifier.verify(&cmd.payload, cmd.signature.as_deref(), now) {
            tracing::warn!(gateway = %gateway, error = %e, "Rejected callback signature");
            return Err(e);
        }

        // 2. Normalize
        let adapter = self.gateways.get(gateway)?;
        let result = adapter
            .confirm_payment(&cmd.payload)
            .map_err(|e| e.into_billing(gateway))?;

        // 3. Resolve the payable
        let record = self.resolve(gateway, result).await?;
        let gateway_subscription_id = record.result.gateway_subscription_id.clone();

        // 4. Ledger
        let outcome = self.ledger.record_or_update(record, now).await?;
        if outcome.is_duplicate() {
            if let Payable::Subscription(subscription_id) = outcome.payment.payable {
                if self.left_unapplied(&outcome.payment, subscription_id).await? {
                    tracing::warn!(
                        gateway = %gateway,
                        payment_id = %outcome.payment.id,
                        subscription_id = %subscription_id,
                        "Re-applying payment outcome missing from subscription"
                    );
                    return self
                        .apply_once(
                            &outcome.payment,
                            subscription_id,
                            gateway_subscription_id.as_deref(),
                            now,
                        )
                        .await;
                }
            }
            tracing::info!(
                gateway = %gateway,
                payment_id = %outcome.payment.id,
                idempotency_key = %outcome.payment.idempotency_key,
                "Duplicate callback absorbed"
            );
            return Ok(CallbackOutcome::Duplicate {
                payment_id: outcome.payment.id,
            });
        }

        // 5. Downstream effects
        match outcome.payment.payable {
            Payable::Subscription(subscription_id) => {
                self.apply_once(
                    &outcome.payment,
                    subscription_id,
                    gateway_subscription_id.as_deref(),
                    now,
                )
                .await
            }
            Payable::Invoice(invoice_id) => {
                if outcome.invoice_paid {
                    let subject = NoticeSubject::Invoice {
                        company_id: outcome.payment.company_id,
                        invoice_id,
                    };
                    if let Err(e) = self.notifier.notify(BillingNotice::InvoicePaid, subject).await {
                        tracing::warn!(
                            invoice_id = %invoice_id,
                            error = %e,
                            "Failed to send invoice paid notice"
                        );
                    }
                }
                Ok(CallbackOutcome::InvoicePayment {
                    invoice_id,
                    paid: outcome.invoice_paid,
                })
            }
        }
    }

    /// Builds the ledger command. Card renewals carry no attribution of their
    /// own and are matched to a subscription through the gateway
    /// subscription id.
    async fn resolve(
        &self,
        gateway: PaymentGateway,
        result: PaymentResult,
    ) -> Result<RecordPaymentCommand, BillingError> {
        let record = RecordPaymentCommand::from_result(gateway, result);
        if record.payable.is_some() {
            return Ok(record);
        }
        let Some(gateway_subscription_id) = record.result.gateway_subscription_id.clone() else {
            return Ok(record);
        };

        let subscription = self
            .subscriptions
            .find_by_gateway_subscription_id(&gateway_subscription_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Subscription", &gateway_subscription_id))?;

        tracing::debug!(
            subscription_id = %subscription.id,
            gateway_subscription_id = %gateway_subscription_id,
            "Resolved gateway-driven renewal"
        );
        Ok(record.with_attribution(
            subscription.company_id,
            Payable::Subscription(subscription.id),
        ))
    }

    /// True when a terminal payment's outcome would still change its
    /// subscription and was never recorded there.
    async fn left_unapplied(
        &self,
        payment: &Payment,
        subscription_id: SubscriptionId,
    ) -> Result<bool, BillingError> {
        let Some(subscription) = self
            .subscriptions
            .find_by_id(payment.company_id, subscription_id)
            .await?
        else {
            return Ok(false);
        };
        let takes_outcome = match payment.status {
            PaymentStatus::Success => subscription.status.is_open(),
            PaymentStatus::Failed | PaymentStatus::Timeout => {
                subscription.status == SubscriptionStatus::Active
            }
            PaymentStatus::Initiated => false,
        };
        Ok(takes_outcome && subscription.awaits_payment(&payment.applied()))
    }

    /// Drives the subscription from a terminal payment. Losing the write to a
    /// concurrent delivery of the same payment counts as a duplicate.
    async fn apply_once(
        &self,
        payment: &Payment,
        subscription_id: SubscriptionId,
        gateway_subscription_id: Option<&str>,
        now: Timestamp,
    ) -> Result<CallbackOutcome, BillingError> {
        match self
            .apply_to_subscription(payment, subscription_id, gateway_subscription_id, now)
            .await
        {
            Err(BillingError::Conflict(reason)) => {
                if self.left_unapplied(payment, subscription_id).await? {
                    return Err(BillingError::Conflict(reason));
                }
                tracing::info!(
                    payment_id = %payment.id,
                    subscription_id = %subscription_id,
                    "Concurrent delivery applied payment first"
                );
                Ok(CallbackOutcome::Duplicate {
                    payment_id: payment.id,
                })
            }
            other => other,
        }
    }

    async fn apply_to_subscription(
        &self,
        payment: &Payment,
        subscription_id: SubscriptionId,
        gateway_subscription_id: Option<&str>,
        now: Timestamp,
    ) -> Result<CallbackOutcome, BillingError> {
        let company_id = payment.company_id;

        if payment.status != PaymentStatus::Success {
            let changed = self
                .state_machine
                .on_renewal_failed(
                    company_id,
                    subscription_id,
                    payment
                        .failure_reason
                        .as_deref()
                        .unwrap_or("payment failed at gateway"),
                    Some(payment.applied()),
                    now,
                )
                .await?;
            return Ok(match changed {
                Some(_) => CallbackOutcome::SubscriptionInGrace { subscription_id },
                None => CallbackOutcome::PaymentFailed {
                    payment_id: payment.id,
                },
            });
        }

        match self
            .state_machine
            .on_payment_confirmed(company_id, subscription_id, payment.applied(), now)
            .await
        {
            // A concurrent delivery applied it first.
            Ok(None) => Ok(CallbackOutcome::Duplicate {
                payment_id: payment.id,
            }),
            Ok(Some(applied)) => {
                let unlinked = applied.subscription.gateway_subscription_id.is_none();
                if let (Some(gateway_subscription_id), true, PaymentGateway::Card) =
                    (gateway_subscription_id, unlinked, payment.gateway)
                {
                    self.state_machine
                        .link_gateway_subscription(
                            company_id,
                            subscription_id,
                            gateway_subscription_id,
                            now,
                        )
                        .await?;
                }
                Ok(CallbackOutcome::SubscriptionUpdated {
                    subscription_id,
                    transition: applied.transition,
                })
            }
            // Money arrived for a cancelled or expired subscription. The
            // payment stands; the subscription stays where it is.
            Err(BillingError::Precondition(reason)) => {
                tracing::warn!(
                    subscription_id = %subscription_id,
                    payment_id = %payment.id,
                    reason = %reason,
                    "Confirmed payment for subscription that cannot accept it"
                );
                Ok(CallbackOutcome::SubscriptionUnchanged {
                    subscription_id,
                    reason,
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::billing::test_support::{at, Fixture};
    use crate::application::handlers::billing::{CancelSubscriptionCommand, RecordInitiationCommand};
    use crate::domain::billing::{sign_body, sign_timestamped, Subscription, SubscriptionStatus};
    use crate::domain::foundation::{Currency, Money};
    use crate::domain::invoice::InvoiceStatus;
    use crate::ports::InvoiceRepository;
    use secrecy::SecretString;
    use serde_json::json;

    const MPESA_SECRET: &str = "mpesa-callback-secret";
    const STRIPE_SECRET: &str = "whsec_test_secret";

    // ════════════════════════════════════════════════════════════════════════════
    // Test Helpers
    // ════════════════════════════════════════════════════════════════════════════

    fn handler(fx: &Fixture) -> HandleGatewayCallbackHandler {
        HandleGatewayCallbackHandler::new(
            fx.registry(),
            Arc::new(fx.store.clone()),
            fx.ledger(),
            fx.state_machine(),
            Arc::new(fx.notifier.clone()),
        )
        .with_verifier(
            PaymentGateway::MobileMoney,
            CallbackVerifier::Body(
                BodySignatureVerifier::new(SecretString::from(MPESA_SECRET.to_string())).unwrap(),
            ),
        )
        .with_verifier(
            PaymentGateway::Card,
            CallbackVerifier::Timestamped(
                TimestampedSignatureVerifier::new(SecretString::from(STRIPE_SECRET.to_string()))
                    .unwrap(),
            ),
        )
    }

    fn mpesa_callback(result: &PaymentResult) -> HandleGatewayCallbackCommand {
        let payload = serde_json::to_vec(result).unwrap();
        HandleGatewayCallbackCommand {
            gateway: PaymentGateway::MobileMoney,
            signature: Some(sign_body(MPESA_SECRET, &payload)),
            payload,
        }
    }

    fn stripe_callback(result: &PaymentResult, now: Timestamp) -> HandleGatewayCallbackCommand {
        let payload = serde_json::to_vec(result).unwrap();
        HandleGatewayCallbackCommand {
            gateway: PaymentGateway::Card,
            signature: Some(sign_timestamped(STRIPE_SECRET, now.as_unix_secs(), &payload)),
            payload,
        }
    }

    /// Records the signup initiation the way the start flow does and returns
    /// the gateway reference.
    async fn initiate_signup(fx: &Fixture, sub: &Subscription, now: Timestamp) -> String {
        let key = sub.signup_idempotency_key();
        fx.ledger()
            .record_initiation(
                RecordInitiationCommand {
                    company_id: sub.company_id,
                    payable: Payable::Subscription(sub.id),
                    amount: fx.plan.price.clone(),
                    gateway: sub.gateway,
                    idempotency_key: key.clone(),
                },
                now,
            )
            .await
            .unwrap();
        let reference = format!("ws_CO_{}", sub.id);
        fx.ledger()
            .attach_gateway_reference(&key, &reference, &json!({}), now)
            .await
            .unwrap();
        reference
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Signature Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn rejects_tampered_body() {
        let fx = Fixture::new();
        let mut cmd = mpesa_callback(&PaymentResult::confirmed("ws_CO_1"));
        cmd.payload.extend_from_slice(b" ");

        let err = handler(&fx).handle(cmd, at(2026, 1, 1)).await.unwrap_err();

        assert!(matches!(err, BillingError::InvalidSignature(_)));
        assert!(fx.store.all_payments().await.is_empty());
    }

    #[tokio::test]
    async fn rejects_missing_signature() {
        let fx = Fixture::new();
        let mut cmd = mpesa_callback(&PaymentResult::confirmed("ws_CO_1"));
        cmd.signature = None;

        let err = handler(&fx).handle(cmd, at(2026, 1, 1)).await.unwrap_err();

        assert!(matches!(err, BillingError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn rejects_stale_timestamped_signature() {
        let fx = Fixture::new();
        let cmd = stripe_callback(&PaymentResult::confirmed("pi_1"), at(2026, 1, 1));

        let err = handler(&fx)
            .handle(cmd, at(2026, 1, 1).add_minutes(10))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::InvalidSignature(_)));
    }

    #[tokio::test]
    async fn unconfigured_gateway_is_a_configuration_error() {
        let fx = Fixture::new();
        let handler = HandleGatewayCallbackHandler::new(
            fx.registry(),
            Arc::new(fx.store.clone()),
            fx.ledger(),
            fx.state_machine(),
            Arc::new(fx.notifier.clone()),
        );

        let err = handler
            .handle(mpesa_callback(&PaymentResult::confirmed("ws_CO_1")), at(2026, 1, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Configuration(_)));
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_payload() {
        let fx = Fixture::new();
        let payload = b"{\"Body\":{}}".to_vec();
        let cmd = HandleGatewayCallbackCommand {
            gateway: PaymentGateway::MobileMoney,
            signature: Some(sign_body(MPESA_SECRET, &payload)),
            payload,
        };

        let err = handler(&fx).handle(cmd, at(2026, 1, 1)).await.unwrap_err();

        assert!(matches!(err, BillingError::InvalidPayload(_)));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Subscription Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn confirmed_signup_activates_once() {
        let fx = Fixture::new();
        let now = at(2026, 1, 1);
        let sub = fx.pending_subscription(PaymentGateway::MobileMoney, now).await;
        let reference = initiate_signup(&fx, &sub, now).await;
        let handler = handler(&fx);
        let callback = mpesa_callback(&PaymentResult::confirmed(reference));

        let first = handler.handle(callback.clone(), now).await.unwrap();
        let second = handler.handle(callback, now).await.unwrap();

        assert_eq!(
            first,
            CallbackOutcome::SubscriptionUpdated {
                subscription_id: sub.id,
                transition: PaymentTransition::Activated,
            }
        );
        assert!(matches!(second, CallbackOutcome::Duplicate { .. }));
        let stored = fx.reload(&sub).await;
        assert_eq!(stored.status, SubscriptionStatus::Active);
        assert_eq!(stored.next_billing_at, Some(at(2026, 2, 1)));
        let payments = fx.store.all_payments().await;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Success);
    }

    #[tokio::test]
    async fn redelivery_activates_signup_left_pending() {
        let fx = Fixture::new();
        let now = at(2026, 1, 1);
        let sub = fx.pending_subscription(PaymentGateway::MobileMoney, now).await;
        let reference = initiate_signup(&fx, &sub, now).await;
        let handler = handler(&fx);
        let callback = mpesa_callback(&PaymentResult::confirmed(reference));
        fx.store.fail_next_subscription_update();

        assert!(handler.handle(callback.clone(), now).await.is_err());
        assert_eq!(fx.store.all_payments().await[0].status, PaymentStatus::Success);
        assert_eq!(fx.reload(&sub).await.status, SubscriptionStatus::Pending);

        let retried = handler.handle(callback.clone(), now).await.unwrap();
        let replayed = handler.handle(callback, now).await.unwrap();

        assert_eq!(
            retried,
            CallbackOutcome::SubscriptionUpdated {
                subscription_id: sub.id,
                transition: PaymentTransition::Activated,
            }
        );
        assert!(matches!(replayed, CallbackOutcome::Duplicate { .. }));
        let stored = fx.reload(&sub).await;
        assert_eq!(stored.status, SubscriptionStatus::Active);
        assert_eq!(stored.next_billing_at, Some(at(2026, 2, 1)));
        let activations = fx
            .store
            .audit_actions()
            .await
            .into_iter()
            .filter(|a| a == "subscription.activated")
            .count();
        assert_eq!(activations, 1);
    }

    #[tokio::test]
    async fn redelivered_failure_enters_grace_once() {
        let fx = Fixture::new();
        let sub = fx.active_subscription(PaymentGateway::MobileMoney, at(2026, 1, 1)).await;
        fx.scheduler().run_renewals(at(2026, 2, 1)).await.unwrap();
        let handler = handler(&fx);
        let callback = mpesa_callback(&PaymentResult::failed(
            fx.mobile.transaction_id(0),
            "Request cancelled by user",
        ));
        fx.store.fail_next_subscription_update();

        assert!(handler.handle(callback.clone(), at(2026, 2, 1)).await.is_err());
        assert_eq!(fx.reload(&sub).await.status, SubscriptionStatus::Active);

        let retried = handler.handle(callback.clone(), at(2026, 2, 1)).await.unwrap();
        let replayed = handler.handle(callback, at(2026, 2, 2)).await.unwrap();

        assert_eq!(retried, CallbackOutcome::SubscriptionInGrace { subscription_id: sub.id });
        assert!(matches!(replayed, CallbackOutcome::Duplicate { .. }));
        let stored = fx.reload(&sub).await;
        assert_eq!(stored.status, SubscriptionStatus::Grace);
        assert_eq!(stored.ends_at, Some(at(2026, 2, 8)));
    }

    #[tokio::test]
    async fn failed_renewal_callback_enters_grace() {
        let fx = Fixture::new();
        let sub = fx.active_subscription(PaymentGateway::MobileMoney, at(2026, 1, 1)).await;
        fx.scheduler().run_renewals(at(2026, 2, 1)).await.unwrap();
        let reference = fx.mobile.transaction_id(0);

        let outcome = handler(&fx)
            .handle(
                mpesa_callback(&PaymentResult::failed(reference, "Request cancelled by user")),
                at(2026, 2, 1),
            )
            .await
            .unwrap();

        assert_eq!(outcome, CallbackOutcome::SubscriptionInGrace { subscription_id: sub.id });
        assert_eq!(fx.reload(&sub).await.status, SubscriptionStatus::Grace);
    }

    #[tokio::test]
    async fn callback_after_timeout_is_absorbed() {
        let fx = Fixture::new();
        let sub = fx.active_subscription(PaymentGateway::MobileMoney, at(2026, 1, 1)).await;
        let scheduler = fx.scheduler();
        scheduler.run_renewals(at(2026, 2, 1)).await.unwrap();
        scheduler
            .run_payment_timeouts(at(2026, 2, 1).add_minutes(30))
            .await
            .unwrap();

        let outcome = handler(&fx)
            .handle(
                mpesa_callback(&PaymentResult::confirmed(fx.mobile.transaction_id(0))),
                at(2026, 2, 1).add_minutes(31),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, CallbackOutcome::Duplicate { .. }));
        assert_eq!(fx.store.all_payments().await[0].status, PaymentStatus::Timeout);
        assert_eq!(fx.reload(&sub).await.status, SubscriptionStatus::Grace);
    }

    #[tokio::test]
    async fn card_renewal_resolves_through_gateway_subscription() {
        let fx = Fixture::new();
        let now = at(2026, 2, 1);
        let (company_id, user_id) = fx.subscriber(PaymentGateway::Card);
        let mut sub = Subscription::pending(
            company_id,
            user_id,
            &fx.plan,
            PaymentGateway::Card,
            true,
            at(2026, 1, 1),
        );
        sub.activate(fx.plan.billing_period, at(2026, 1, 1)).unwrap();
        sub.attach_gateway_subscription("sub_123", at(2026, 1, 1)).unwrap();
        fx.insert(&sub).await;

        let result = PaymentResult::confirmed("in_1")
            .with_amount(Money::new(100_000, Currency::kes()))
            .with_gateway_subscription("sub_123");
        let outcome = handler(&fx)
            .handle(stripe_callback(&result, now), now)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CallbackOutcome::SubscriptionUpdated {
                subscription_id: sub.id,
                transition: PaymentTransition::Renewed,
            }
        );
        let payments = fx.store.all_payments().await;
        assert_eq!(payments[0].idempotency_key, "card:in_1");
        assert_eq!(payments[0].payable, Payable::Subscription(sub.id));
        assert_eq!(fx.reload(&sub).await.next_billing_at, Some(at(2026, 3, 1)));
    }

    #[tokio::test]
    async fn unknown_gateway_subscription_is_not_found() {
        let fx = Fixture::new();
        let now = at(2026, 2, 1);
        let result = PaymentResult::confirmed("in_9")
            .with_amount(Money::new(100_000, Currency::kes()))
            .with_gateway_subscription("sub_unknown");

        let err = handler(&fx)
            .handle(stripe_callback(&result, now), now)
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::NotFound { .. }));
        assert!(fx.store.all_payments().await.is_empty());
    }

    #[tokio::test]
    async fn payment_for_cancelled_subscription_is_recorded_only() {
        let fx = Fixture::new();
        let now = at(2026, 1, 1);
        let sub = fx.active_subscription(PaymentGateway::MobileMoney, now).await;
        fx.state_machine()
            .cancel(
                CancelSubscriptionCommand {
                    company_id: sub.company_id,
                    subscription_id: sub.id,
                    reason: None,
                    actor: None,
                },
                now,
            )
            .await
            .unwrap();
        let result = PaymentResult::confirmed("ws_CO_late")
            .with_attribution(sub.company_id, Payable::Subscription(sub.id))
            .with_amount(fx.plan.price.clone());

        let outcome = handler(&fx)
            .handle(mpesa_callback(&result), at(2026, 1, 2))
            .await
            .unwrap();

        assert!(matches!(outcome, CallbackOutcome::SubscriptionUnchanged { .. }));
        assert_eq!(fx.store.all_payments().await.len(), 1);
        assert_eq!(fx.reload(&sub).await.status, SubscriptionStatus::Cancelled);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Invoice Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn full_invoice_payment_marks_paid_and_notifies() {
        let fx = Fixture::new();
        let now = at(2026, 3, 1);
        let (company_id, _) = fx.subscriber(PaymentGateway::MobileMoney);
        let invoice = fx.finalized_invoice(company_id, now).await;
        let result = PaymentResult::confirmed("ws_CO_inv")
            .with_attribution(company_id, Payable::Invoice(invoice.id))
            .with_amount(Money::new(11_600, Currency::kes()));

        let outcome = handler(&fx)
            .handle(mpesa_callback(&result), now)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CallbackOutcome::InvoicePayment {
                invoice_id: invoice.id,
                paid: true
            }
        );
        let stored = InvoiceRepository::find_by_id(&fx.store, company_id, invoice.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, InvoiceStatus::Paid);
        assert_eq!(fx.notifier.count(BillingNotice::InvoicePaid), 1);
    }

    #[tokio::test]
    async fn partial_invoice_payment_stays_finalized() {
        let fx = Fixture::new();
        let now = at(2026, 3, 1);
        let (company_id, _) = fx.subscriber(PaymentGateway::MobileMoney);
        let invoice = fx.finalized_invoice(company_id, now).await;
        let result = PaymentResult::confirmed("ws_CO_part")
            .with_attribution(company_id, Payable::Invoice(invoice.id))
            .with_amount(Money::new(5_000, Currency::kes()));

        let outcome = handler(&fx)
            .handle(mpesa_callback(&result), now)
            .await
            .unwrap();

        assert_eq!(outcome.message(), "Invoice payment recorded");
        assert_eq!(fx.notifier.count(BillingNotice::InvoicePaid), 0);
    }
}
