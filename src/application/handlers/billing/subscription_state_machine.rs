//! SubscriptionStateMachine - Owns every subscription status change.
//!
//! Transitions are validated by the domain aggregate, persisted together with
//! their audit entry, and followed by a best-effort notice. A notice that
//! cannot be delivered is logged; the transition stands.
//!
//! | From | Event | To |
//! |------|-------|----|
//! | PENDING | first payment confirmed | ACTIVE |
//! | ACTIVE | renewal confirmed | ACTIVE |
//! | ACTIVE | renewal failed or timed out | GRACE |
//! | GRACE | late payment confirmed | ACTIVE |
//! | GRACE | grace window closed | EXPIRED |
//! | ACTIVE/GRACE | cancellation | CANCELLED |
//! | ACTIVE/GRACE | country mismatch | CANCELLED + new PENDING |
//!
//! Payment-driven transitions store the payment on the subscription in the
//! same write, so applying a payment a second time is a no-op.

use std::sync::Arc;

use serde_json::{json, Value as JsonValue};

use crate::domain::billing::{
    AppliedPayment, BillingError, CountryCode, PaymentGateway, PaymentTransition, Subscription,
    SubscriptionPlan, SubscriptionStatus,
};
use crate::domain::foundation::{AuditEntry, CompanyId, SubscriptionId, Timestamp};
use crate::ports::{
    BillingNotice, CancellationContext, GatewayCancellation, NoticeSubject, Notifier, PlanCatalog,
    SubscriptionRepository,
};

use super::{BillingPolicy, GatewayRegistry};

/// A confirmed payment applied to its subscription.
#[derive(Debug, Clone)]
pub struct PaymentApplied {
    pub subscription: Subscription,
    pub transition: PaymentTransition,
}

/// Command to cancel a subscription.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub company_id: CompanyId,
    pub subscription_id: SubscriptionId,
    pub reason: Option<String>,
    /// Recorded on the audit entry; system when absent.
    pub actor: Option<String>,
}

/// What the gateway made of a cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCancellation {
    /// Gateway stops billing at period end.
    Confirmed,
    /// Gateway has no subscriptions; cancellation is local only.
    LocalOnly { reason: String },
    /// Gateway refused, with its own text.
    Rejected { message: String },
    /// Gateway unreachable or misconfigured.
    Failed { message: String },
}

impl RemoteCancellation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteCancellation::Confirmed => "confirmed",
            RemoteCancellation::LocalOnly { .. } => "local_only",
            RemoteCancellation::Rejected { .. } => "rejected",
            RemoteCancellation::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelSubscriptionResult {
    pub subscription: Subscription,
    pub remote: RemoteCancellation,
}

/// Result of a gateway migration.
#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub cancelled: Subscription,
    pub successor: Subscription,
    pub remote: RemoteCancellation,
}

pub struct SubscriptionStateMachine {
    subscriptions: Arc<dyn SubscriptionRepository>,
    plans: Arc<dyn PlanCatalog>,
    notifier: Arc<dyn Notifier>,
    gateways: GatewayRegistry,
    policy: BillingPolicy,
}

impl SubscriptionStateMachine {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        plans: Arc<dyn PlanCatalog>,
        notifier: Arc<dyn Notifier>,
        gateways: GatewayRegistry,
        policy: BillingPolicy,
    ) -> Self {
        Self {
            subscriptions,
            plans,
            notifier,
            gateways,
            policy,
        }
    }

    pub fn policy(&self) -> &BillingPolicy {
        &self.policy
    }

    /// Applies a confirmed payment: activation, renewal or recovery. Returns
    /// `None` when this payment, or a later one, was already applied.
    pub async fn on_payment_confirmed(
        &self,
        company_id: CompanyId,
        subscription_id: SubscriptionId,
        payment: AppliedPayment,
        now: Timestamp,
    ) -> Result<Option<PaymentApplied>, BillingError> {
        // 1. Load subscription and plan
        let mut subscription = self.load(company_id, subscription_id).await?;
        if !subscription.awaits_payment(&payment) {
            tracing::debug!(
                subscription_id = %subscription.id,
                payment_id = %payment.payment_id,
                "Payment already applied"
            );
            return Ok(None);
        }
        let plan = self.plan_for(&subscription).await?;

        // 2. Domain transition
        let transition = subscription.apply_confirmed_payment(plan.billing_period, now)?;
        subscription.record_applied_payment(payment);

        // 3. Persist with audit
        let subscription = self
            .persist(
                &subscription,
                transition.audit_action(),
                json!({
                    "next_billing_at": subscription.next_billing_at,
                    "period": plan.billing_period,
                    "payment_id": payment.payment_id,
                }),
                now,
            )
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            company_id = %subscription.company_id,
            gateway = %subscription.gateway,
            transition = ?transition,
            "Subscription payment applied"
        );

        Ok(Some(PaymentApplied {
            subscription,
            transition,
        }))
    }

    /// A renewal charge failed or timed out. ACTIVE moves to GRACE; every
    /// other state is left alone and `None` is returned, as is a payment
    /// that was already applied.
    pub async fn on_renewal_failed(
        &self,
        company_id: CompanyId,
        subscription_id: SubscriptionId,
        reason: &str,
        payment: Option<AppliedPayment>,
        now: Timestamp,
    ) -> Result<Option<Subscription>, BillingError> {
        let mut subscription = self.load(company_id, subscription_id).await?;
        let stale = payment.map_or(false, |p| !subscription.awaits_payment(&p));
        if subscription.status != SubscriptionStatus::Active || stale {
            tracing::debug!(
                subscription_id = %subscription.id,
                status = %subscription.status,
                reason = %reason,
                "Payment failure leaves subscription unchanged"
            );
            return Ok(None);
        }

        subscription.enter_grace(self.policy.grace_period_days, now)?;
        if let Some(payment) = payment {
            subscription.record_applied_payment(payment);
        }
        let subscription = self
            .persist(
                &subscription,
                "subscription.grace_started",
                json!({
                    "reason": reason,
                    "ends_at": subscription.ends_at,
                    "payment_id": payment.map(|p| p.payment_id),
                }),
                now,
            )
            .await?;

        tracing::warn!(
            subscription_id = %subscription.id,
            company_id = %subscription.company_id,
            gateway = %subscription.gateway,
            reason = %reason,
            "Subscription entered grace period"
        );
        self.notify(BillingNotice::GraceStarted, &subscription).await;
        Ok(Some(subscription))
    }

    /// GRACE to EXPIRED. Rejected from any other state or while the window is open.
    pub async fn expire(
        &self,
        company_id: CompanyId,
        subscription_id: SubscriptionId,
        now: Timestamp,
    ) -> Result<Subscription, BillingError> {
        let mut subscription = self.load(company_id, subscription_id).await?;
        subscription.expire(now)?;
        let subscription = self
            .persist(
                &subscription,
                "subscription.expired",
                json!({ "grace_ended_at": subscription.ends_at }),
                now,
            )
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            company_id = %subscription.company_id,
            "Subscription expired"
        );
        self.notify(BillingNotice::SubscriptionExpired, &subscription)
            .await;
        Ok(subscription)
    }

    /// Cancels locally and asks the gateway to stop billing. The gateway's
    /// answer never blocks the local cancellation.
    pub async fn cancel(
        &self,
        cmd: CancelSubscriptionCommand,
        now: Timestamp,
    ) -> Result<CancelSubscriptionResult, BillingError> {
        // 1. Validate the transition before touching the gateway
        let mut subscription = self.load(cmd.company_id, cmd.subscription_id).await?;
        subscription.cancel(cmd.reason.clone(), now)?;

        // 2. Remote cancellation, best-effort
        let remote = self.cancel_remotely(&subscription).await;

        // 3. Persist with audit
        let mut audit = self.audit(
            &subscription,
            "subscription.cancelled",
            json!({ "reason": cmd.reason, "remote": remote.as_str() }),
            now,
        );
        if let Some(actor) = cmd.actor {
            audit = audit.with_actor(actor);
        }
        let subscription = self.subscriptions.update(&subscription, &audit).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            company_id = %subscription.company_id,
            remote = remote.as_str(),
            "Subscription cancelled"
        );
        self.notify(BillingNotice::SubscriptionCancelled, &subscription)
            .await;

        Ok(CancelSubscriptionResult {
            subscription,
            remote,
        })
    }

    /// Moves a subscription to the gateway its subscriber's country calls for.
    /// The old one is cancelled and a PENDING successor is created in the same
    /// write.
    pub async fn migrate(
        &self,
        company_id: CompanyId,
        subscription_id: SubscriptionId,
        country: &CountryCode,
        now: Timestamp,
    ) -> Result<MigrationResult, BillingError> {
        let mut subscription = self.load(company_id, subscription_id).await?;
        let from = subscription.gateway;
        let to = PaymentGateway::for_country(country);
        let reason = format!(
            "country changed to {}: {} billing replaced by {}",
            country, from, to
        );

        let successor = subscription.migrate_to(to, reason.clone(), now)?;
        let remote = self.cancel_remotely(&subscription).await;

        let audit = [
            self.audit(
                &subscription,
                "subscription.cancelled",
                json!({ "reason": reason, "remote": remote.as_str() }),
                now,
            ),
            self.audit(
                &successor,
                "subscription.created",
                json!({
                    "migrated_from": subscription.id,
                    "gateway": to,
                    "country": country,
                }),
                now,
            ),
        ];
        self.subscriptions
            .replace(&subscription, &successor, &audit)
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            successor_id = %successor.id,
            company_id = %company_id,
            from = %from,
            to = %to,
            "Subscription migrated to new gateway"
        );
        self.notify(BillingNotice::GatewayMigrated, &successor).await;

        Ok(MigrationResult {
            cancelled: subscription,
            successor,
            remote,
        })
    }

    /// Sends the renewal reminder once per billing date. Returns false when
    /// the subscription does not need one. The reminder is only marked sent
    /// after the notice is delivered.
    pub async fn send_reminder(
        &self,
        company_id: CompanyId,
        subscription_id: SubscriptionId,
        now: Timestamp,
    ) -> Result<bool, BillingError> {
        let mut subscription = self.load(company_id, subscription_id).await?;
        if !subscription.needs_reminder(now, self.policy.reminder_days_before) {
            return Ok(false);
        }

        self.notifier
            .notify(BillingNotice::RenewalReminder, subject(&subscription))
            .await?;

        subscription.mark_reminder_sent(now);
        self.persist(
            &subscription,
            "subscription.reminder_sent",
            json!({ "next_billing_at": subscription.next_billing_at }),
            now,
        )
        .await?;
        Ok(true)
    }

    /// Links the card gateway's subscription id so gateway-driven renewals
    /// can be attributed.
    pub async fn link_gateway_subscription(
        &self,
        company_id: CompanyId,
        subscription_id: SubscriptionId,
        gateway_subscription_id: &str,
        now: Timestamp,
    ) -> Result<Subscription, BillingError> {
        let mut subscription = self.load(company_id, subscription_id).await?;
        if subscription.gateway_subscription_id.as_deref() == Some(gateway_subscription_id) {
            return Ok(subscription);
        }
        subscription.attach_gateway_subscription(gateway_subscription_id, now)?;
        self.persist(
            &subscription,
            "subscription.gateway_linked",
            json!({ "gateway_subscription_id": gateway_subscription_id }),
            now,
        )
        .await
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Internals
    // ════════════════════════════════════════════════════════════════════════════

    async fn load(
        &self,
        company_id: CompanyId,
        subscription_id: SubscriptionId,
    ) -> Result<Subscription, BillingError> {
        self.subscriptions
            .find_by_id(company_id, subscription_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Subscription", subscription_id))
    }

    async fn plan_for(&self, subscription: &Subscription) -> Result<SubscriptionPlan, BillingError> {
        self.plans
            .find_by_id(subscription.plan_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Plan", subscription.plan_id))
    }

    async fn persist(
        &self,
        subscription: &Subscription,
        action: &str,
        metadata: JsonValue,
        now: Timestamp,
    ) -> Result<Subscription, BillingError> {
        let audit = self.audit(subscription, action, metadata, now);
        Ok(self.subscriptions.update(subscription, &audit).await?)
    }

    fn audit(
        &self,
        subscription: &Subscription,
        action: &str,
        metadata: JsonValue,
        now: Timestamp,
    ) -> AuditEntry {
        let mut metadata = metadata;
        if let Some(map) = metadata.as_object_mut() {
            map.insert("status".to_string(), json!(subscription.status));
        }
        AuditEntry::system(action, "subscription", subscription.id, subscription.company_id)
            .with_metadata(metadata)
            .at(now)
    }

    async fn cancel_remotely(&self, subscription: &Subscription) -> RemoteCancellation {
        let adapter = match self.gateways.get(subscription.gateway) {
            Ok(adapter) => adapter,
            Err(e) => {
                return RemoteCancellation::Failed {
                    message: e.to_string(),
                }
            }
        };
        let context = CancellationContext {
            company_id: subscription.company_id,
            subscription_id: subscription.id,
            gateway_subscription_id: subscription.gateway_subscription_id.clone(),
        };
        match adapter.cancel_subscription(&context).await {
            Ok(GatewayCancellation::Cancelled) => RemoteCancellation::Confirmed,
            Ok(GatewayCancellation::Unsupported { reason }) => {
                RemoteCancellation::LocalOnly { reason }
            }
            Ok(GatewayCancellation::Rejected { message }) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    message = %message,
                    "Gateway rejected cancellation"
                );
                RemoteCancellation::Rejected { message }
            }
            Err(e) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "Remote cancellation failed"
                );
                RemoteCancellation::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn notify(&self, notice: BillingNotice, subscription: &Subscription) {
        if let Err(e) = self.notifier.notify(notice, subject(subscription)).await {
            tracing::warn!(
                subscription_id = %subscription.id,
                notice = %notice,
                error = %e,
                "Billing notice not delivered"
            );
        }
    }
}

fn subject(subscription: &Subscription) -> NoticeSubject {
    NoticeSubject::Subscription {
        company_id: subscription.company_id,
        subscription_id: subscription.id,
    }
}
