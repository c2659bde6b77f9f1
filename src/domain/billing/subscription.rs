//! Subscription aggregate.
//!
//! A Subscription is a company's billing relationship to a plan. Status only
//! moves along the edges of [`SubscriptionStatus`]; every mutator here goes
//! through that check before touching any dates.
//!
//! # Invariants
//!
//! - `gateway` matches the subscriber's country at creation
//! - `ends_at` is the grace expiry while GRACE and is cleared on recovery
//! - `gateway_subscription_id` is only set for card subscriptions
//! - `last_payment` only moves forward in initiation order
//! - rows are never deleted; cancellation is a status

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    CompanyId, PaymentId, PlanId, StateMachine, SubscriptionId, Timestamp, UserId,
};

use super::{BillingError, BillingPeriod, PaymentGateway, SubscriptionPlan, SubscriptionStatus};

/// Result of applying a confirmed payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTransition {
    /// PENDING became ACTIVE.
    Activated,
    /// ACTIVE stayed ACTIVE with the next billing date advanced.
    Renewed,
    /// GRACE returned to ACTIVE.
    Recovered,
}

impl PaymentTransition {
    pub fn audit_action(&self) -> &'static str {
        match self {
            PaymentTransition::Activated => "subscription.activated",
            PaymentTransition::Renewed => "subscription.renewed",
            PaymentTransition::Recovered => "subscription.recovered",
        }
    }
}

/// The payment whose outcome a subscription last took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPayment {
    pub payment_id: PaymentId,
    pub initiated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub company_id: CompanyId,
    pub user_id: UserId,
    pub plan_id: PlanId,

    /// Plan code denormalized for reporting.
    pub plan_code: String,

    pub status: SubscriptionStatus,
    pub gateway: PaymentGateway,
    pub starts_at: Option<Timestamp>,

    /// Grace expiry while GRACE.
    pub ends_at: Option<Timestamp>,

    pub next_billing_at: Option<Timestamp>,
    pub auto_renew: bool,

    /// Gateway-side subscription id. Card only.
    pub gateway_subscription_id: Option<String>,

    pub cancelled_at: Option<Timestamp>,
    pub cancellation_reason: Option<String>,

    /// The `next_billing_at` a renewal reminder was last sent for.
    pub reminder_sent_for: Option<Timestamp>,

    /// Written in the same update as the transition the payment caused.
    pub last_payment: Option<AppliedPayment>,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,

    /// Optimistic concurrency version, bumped by the store on every write.
    pub version: i64,
}

impl Subscription {
    /// Creates a subscription awaiting its first payment.
    pub fn pending(
        company_id: CompanyId,
        user_id: UserId,
        plan: &SubscriptionPlan,
        gateway: PaymentGateway,
        auto_renew: bool,
        now: Timestamp,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            company_id,
            user_id,
            plan_id: plan.id,
            plan_code: plan.code.clone(),
            status: SubscriptionStatus::Pending,
            gateway,
            starts_at: None,
            ends_at: None,
            next_billing_at: None,
            auto_renew,
            gateway_subscription_id: None,
            cancelled_at: None,
            cancellation_reason: None,
            reminder_sent_for: None,
            last_payment: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// PENDING to ACTIVE on the first confirmed payment.
    pub fn activate(&mut self, period: BillingPeriod, now: Timestamp) -> Result<(), BillingError> {
        self.transition_to(SubscriptionStatus::Active)?;
        self.starts_at = Some(now);
        self.next_billing_at = Some(period.advance(now));
        self.ends_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// ACTIVE renewal. Advances from the scheduled billing date, not from
    /// now, unless that still leaves it in the past; missed periods are not
    /// charged one by one.
    pub fn renew(&mut self, period: BillingPeriod, now: Timestamp) -> Result<(), BillingError> {
        if self.status != SubscriptionStatus::Active {
            return Err(self.wrong_state("renew"));
        }
        self.advance_billing(period, now);
        self.updated_at = now;
        Ok(())
    }

    /// ACTIVE to GRACE after a failed or timed-out renewal.
    pub fn enter_grace(&mut self, grace_days: i64, now: Timestamp) -> Result<(), BillingError> {
        if self.status != SubscriptionStatus::Active {
            return Err(self.wrong_state("enter grace for"));
        }
        self.transition_to(SubscriptionStatus::Grace)?;
        self.ends_at = Some(now.add_days(grace_days));
        self.updated_at = now;
        Ok(())
    }

    /// GRACE to ACTIVE on a late payment. The next billing date is advanced
    /// one period and never left in the past.
    pub fn recover(&mut self, period: BillingPeriod, now: Timestamp) -> Result<(), BillingError> {
        if self.status != SubscriptionStatus::Grace {
            return Err(self.wrong_state("recover"));
        }
        self.transition_to(SubscriptionStatus::Active)?;
        self.advance_billing(period, now);
        self.ends_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// GRACE to EXPIRED once `ends_at` has passed. Rejected from every other state.
    pub fn expire(&mut self, now: Timestamp) -> Result<(), BillingError> {
        if self.status != SubscriptionStatus::Grace {
            return Err(BillingError::precondition(format!(
                "Subscription {} is {}; only grace subscriptions can expire",
                self.id, self.status
            )));
        }
        match self.ends_at {
            Some(ends_at) if !ends_at.is_after(&now) => {}
            Some(ends_at) => {
                return Err(BillingError::precondition(format!(
                    "Grace period for subscription {} runs until {}",
                    self.id, ends_at
                )))
            }
            None => {
                return Err(BillingError::precondition(format!(
                    "Subscription {} has no grace expiry",
                    self.id
                )))
            }
        }
        self.transition_to(SubscriptionStatus::Expired)?;
        self.updated_at = now;
        Ok(())
    }

    /// ACTIVE or GRACE to CANCELLED.
    pub fn cancel(&mut self, reason: Option<String>, now: Timestamp) -> Result<(), BillingError> {
        self.transition_to(SubscriptionStatus::Cancelled)?;
        self.cancelled_at = Some(now);
        self.cancellation_reason = reason;
        self.updated_at = now;
        Ok(())
    }

    /// Dispatches a confirmed payment to the matching transition.
    pub fn apply_confirmed_payment(
        &mut self,
        period: BillingPeriod,
        now: Timestamp,
    ) -> Result<PaymentTransition, BillingError> {
        match self.status {
            SubscriptionStatus::Pending => {
                self.activate(period, now)?;
                Ok(PaymentTransition::Activated)
            }
            SubscriptionStatus::Active => {
                self.renew(period, now)?;
                Ok(PaymentTransition::Renewed)
            }
            SubscriptionStatus::Grace => {
                self.recover(period, now)?;
                Ok(PaymentTransition::Recovered)
            }
            SubscriptionStatus::Expired | SubscriptionStatus::Cancelled => {
                Err(self.wrong_state("apply a payment to"))
            }
        }
    }

    /// Cancels this subscription for a gateway change and returns its PENDING
    /// successor on the new gateway. Plan, company, user and auto-renew carry over.
    pub fn migrate_to(
        &mut self,
        gateway: PaymentGateway,
        reason: impl Into<String>,
        now: Timestamp,
    ) -> Result<Subscription, BillingError> {
        if gateway == self.gateway {
            return Err(BillingError::precondition(format!(
                "Subscription {} is already on {}",
                self.id, gateway
            )));
        }
        self.cancel(Some(reason.into()), now)?;
        Ok(Subscription {
            id: SubscriptionId::new(),
            company_id: self.company_id,
            user_id: self.user_id,
            plan_id: self.plan_id,
            plan_code: self.plan_code.clone(),
            status: SubscriptionStatus::Pending,
            gateway,
            starts_at: None,
            ends_at: None,
            next_billing_at: None,
            auto_renew: self.auto_renew,
            gateway_subscription_id: None,
            cancelled_at: None,
            cancellation_reason: None,
            reminder_sent_for: None,
            last_payment: None,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Links the gateway-side subscription. Card only.
    pub fn attach_gateway_subscription(
        &mut self,
        gateway_subscription_id: impl Into<String>,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        if self.gateway != PaymentGateway::Card {
            return Err(BillingError::unsupported(
                "gateway subscriptions exist only for card billing",
            ));
        }
        self.gateway_subscription_id = Some(gateway_subscription_id.into());
        self.updated_at = now;
        Ok(())
    }

    /// Whether the outcome of `payment` has yet to be applied: it is not the
    /// last applied payment and was not initiated before it.
    pub fn awaits_payment(&self, payment: &AppliedPayment) -> bool {
        match &self.last_payment {
            None => true,
            Some(last) => {
                last.payment_id != payment.payment_id
                    && !last.initiated_at.is_after(&payment.initiated_at)
            }
        }
    }

    pub fn record_applied_payment(&mut self, payment: AppliedPayment) {
        self.last_payment = Some(payment);
    }

    /// Records that the reminder for the current billing date went out.
    pub fn mark_reminder_sent(&mut self, now: Timestamp) {
        self.reminder_sent_for = self.next_billing_at;
        self.updated_at = now;
    }

    /// ACTIVE, auto-renewing and past its billing date.
    pub fn is_due_for_renewal(&self, now: Timestamp) -> bool {
        self.status == SubscriptionStatus::Active
            && self.auto_renew
            && self.next_billing_at.map_or(false, |at| !at.is_after(&now))
    }

    /// GRACE with the window closed.
    pub fn is_grace_expired(&self, now: Timestamp) -> bool {
        self.status == SubscriptionStatus::Grace
            && self.ends_at.map_or(false, |at| !at.is_after(&now))
    }

    /// ACTIVE, auto-renewing, billing within `lead_days`, and not yet reminded
    /// for this billing date.
    pub fn needs_reminder(&self, now: Timestamp, lead_days: i64) -> bool {
        if self.status != SubscriptionStatus::Active || !self.auto_renew {
            return false;
        }
        let Some(next) = self.next_billing_at else {
            return false;
        };
        next.is_after(&now)
            && !next.is_after(&now.add_days(lead_days))
            && self.reminder_sent_for != Some(next)
    }

    /// Idempotency key for the renewal of the current billing date.
    pub fn renewal_idempotency_key(&self) -> Option<String> {
        self.next_billing_at
            .map(|at| format!("renewal:{}:{}", self.id, at.as_unix_secs()))
    }

    /// Idempotency key for a grace-period retry, one per calendar day.
    pub fn grace_retry_idempotency_key(&self, now: Timestamp) -> Option<String> {
        self.renewal_idempotency_key()
            .map(|key| format!("{}:retry:{}", key, now.as_datetime().format("%Y%m%d")))
    }

    /// Idempotency key for the first payment.
    pub fn signup_idempotency_key(&self) -> String {
        format!("signup:{}", self.id)
    }

    fn advance_billing(&mut self, period: BillingPeriod, now: Timestamp) {
        let advanced = period.advance(self.next_billing_at.unwrap_or(now));
        self.next_billing_at = Some(if advanced.is_after(&now) {
            advanced
        } else {
            period.advance(now)
        });
    }

    fn transition_to(&mut self, target: SubscriptionStatus) -> Result<(), BillingError> {
        self.status = self.status.transition_to(target).map_err(|_| {
            BillingError::precondition(format!(
                "Cannot transition subscription {} from {} to {}",
                self.id, self.status, target
            ))
        })?;
        Ok(())
    }

    fn wrong_state(&self, action: &str) -> BillingError {
        BillingError::precondition(format!(
            "Cannot {} subscription {} in {} state",
            action, self.id, self.status
        ))
    }
}
