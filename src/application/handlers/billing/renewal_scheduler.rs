//! RenewalScheduler - Periodic billing sweeps.
//!
//! Each sweep loads its candidates with one query and then processes them
//! independently with bounded concurrency. A failing item is logged and
//! counted; it never aborts the sweep. Every sweep is safe to re-run: the
//! candidate queries and idempotency keys make a second run a no-op.
//!
//! Gateways that bill renewals themselves (`supports_recurring`) are left to
//! their webhooks; the scheduler only charges the others.

use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use futures::FutureExt;

use crate::domain::billing::{BillingError, PaymentGateway, Subscription};
use crate::domain::foundation::Timestamp;
use crate::domain::payment::{Payable, Payment, PaymentStatus};
use crate::ports::{
    PayerContact, PaymentContext, PaymentGatewayAdapter, PlanCatalog, SubscriberDirectory,
    SubscriptionRepository,
};

use super::{
    BillingPolicy, GatewayRegistry, PaymentLedger, RecordInitiationCommand,
    SubscriptionStateMachine,
};

/// Counts from one sweep run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sweep: &'static str,
    pub examined: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Processed,
    Skipped,
}

/// Result of opening a charge.
enum Initiation {
    /// A new payment was opened and the gateway accepted the request.
    Requested,
    /// A payment already exists for the key.
    AlreadyAttempted(Payment),
}

/// Something a sweep iterates over.
trait SweepItem {
    fn entity_id(&self) -> String;
}

impl SweepItem for Subscription {
    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

impl SweepItem for Payment {
    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

pub struct RenewalScheduler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    plans: Arc<dyn PlanCatalog>,
    directory: Arc<dyn SubscriberDirectory>,
    gateways: GatewayRegistry,
    ledger: Arc<PaymentLedger>,
    state_machine: Arc<SubscriptionStateMachine>,
    policy: BillingPolicy,
}

impl RenewalScheduler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        plans: Arc<dyn PlanCatalog>,
        directory: Arc<dyn SubscriberDirectory>,
        gateways: GatewayRegistry,
        ledger: Arc<PaymentLedger>,
        state_machine: Arc<SubscriptionStateMachine>,
        policy: BillingPolicy,
    ) -> Self {
        Self {
            subscriptions,
            plans,
            directory,
            gateways,
            ledger,
            state_machine,
            policy,
        }
    }

    /// Runs every sweep once. A sweep whose candidate query fails is logged
    /// and left out of the result.
    pub async fn run_all(&self, now: Timestamp) -> Vec<SweepReport> {
        let runs = [
            self.run_payment_timeouts(now).await,
            self.run_grace_expiry(now).await,
            self.run_renewals(now).await,
            self.run_grace_retries(now).await,
            self.run_reminders(now).await,
            self.run_country_check(now).await,
        ];
        runs.into_iter()
            .filter_map(|run| match run {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::error!(error = %e, "Sweep could not load candidates");
                    None
                }
            })
            .collect()
    }

    /// Charges ACTIVE, auto-renewing subscriptions whose billing date has
    /// passed, on gateways that do not renew by themselves.
    pub async fn run_renewals(&self, now: Timestamp) -> Result<SweepReport, BillingError> {
        let due = self.subscriptions.find_due_for_renewal(now).await?;
        Ok(self
            .sweep("renewal", due, |sub| self.renew_one(sub, now))
            .await)
    }

    /// One retry per day for GRACE subscriptions on scheduler-driven gateways.
    pub async fn run_grace_retries(&self, now: Timestamp) -> Result<SweepReport, BillingError> {
        let in_grace = self.subscriptions.find_in_grace().await?;
        Ok(self
            .sweep("grace_retry", in_grace, |sub| self.retry_one(sub, now))
            .await)
    }

    /// GRACE subscriptions whose window has closed become EXPIRED.
    pub async fn run_grace_expiry(&self, now: Timestamp) -> Result<SweepReport, BillingError> {
        let expired = self.subscriptions.find_grace_expired(now).await?;
        Ok(self
            .sweep("grace_expiry", expired, |sub| async move {
                self.state_machine
                    .expire(sub.company_id, sub.id, now)
                    .await
                    .map(|_| ItemOutcome::Processed)
            })
            .await)
    }

    /// Renewal reminders for subscriptions billing within the lead window.
    pub async fn run_reminders(&self, now: Timestamp) -> Result<SweepReport, BillingError> {
        let until = now.add_days(self.policy.reminder_days_before);
        let upcoming = self.subscriptions.find_billing_between(now, until).await?;
        Ok(self
            .sweep("reminder", upcoming, |sub| async move {
                let sent = self
                    .state_machine
                    .send_reminder(sub.company_id, sub.id, now)
                    .await?;
                Ok(if sent {
                    ItemOutcome::Processed
                } else {
                    ItemOutcome::Skipped
                })
            })
            .await)
    }

    /// Times out stale INITIATED payments. A timed-out subscription renewal
    /// counts as a failed renewal.
    pub async fn run_payment_timeouts(&self, now: Timestamp) -> Result<SweepReport, BillingError> {
        let cutoff = now.add_minutes(-self.policy.payment_timeout_minutes);
        let timed_out = self.ledger.sweep_timed_out(cutoff, now).await?;
        Ok(self
            .sweep("payment_timeout", timed_out, |payment| async move {
                let Payable::Subscription(subscription_id) = payment.payable else {
                    return Ok(ItemOutcome::Skipped);
                };
                let changed = self
                    .state_machine
                    .on_renewal_failed(
                        payment.company_id,
                        subscription_id,
                        "payment timed out awaiting gateway confirmation",
                        Some(payment.applied()),
                        now,
                    )
                    .await?;
                Ok(if changed.is_some() {
                    ItemOutcome::Processed
                } else {
                    ItemOutcome::Skipped
                })
            })
            .await)
    }

    /// Migrates billable subscriptions whose subscriber moved to a country
    /// served by another gateway.
    pub async fn run_country_check(&self, now: Timestamp) -> Result<SweepReport, BillingError> {
        let billable = self.subscriptions.find_billable().await?;
        Ok(self
            .sweep("country_check", billable, |sub| self.migrate_one(sub, now))
            .await)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Per-item processing
    // ════════════════════════════════════════════════════════════════════════════

    async fn renew_one(&self, sub: Subscription, now: Timestamp) -> Result<ItemOutcome, BillingError> {
        let adapter = self.gateways.get(sub.gateway)?;
        if adapter.supports_recurring() {
            return Ok(ItemOutcome::Skipped);
        }
        let Some(key) = sub.renewal_idempotency_key() else {
            return Ok(ItemOutcome::Skipped);
        };
        self.charge(&sub, adapter.as_ref(), key, now).await
    }

    async fn retry_one(&self, sub: Subscription, now: Timestamp) -> Result<ItemOutcome, BillingError> {
        let adapter = self.gateways.get(sub.gateway)?;
        if adapter.supports_recurring() {
            return Ok(ItemOutcome::Skipped);
        }
        let Some(key) = sub.grace_retry_idempotency_key(now) else {
            return Ok(ItemOutcome::Skipped);
        };
        self.charge(&sub, adapter.as_ref(), key, now).await
    }

    async fn migrate_one(&self, sub: Subscription, now: Timestamp) -> Result<ItemOutcome, BillingError> {
        let Some(profile) = self
            .directory
            .find_subscriber(sub.company_id, sub.user_id)
            .await?
        else {
            tracing::warn!(
                subscription_id = %sub.id,
                company_id = %sub.company_id,
                "No subscriber profile; country check skipped"
            );
            return Ok(ItemOutcome::Skipped);
        };
        if PaymentGateway::for_country(&profile.country) == sub.gateway {
            return Ok(ItemOutcome::Skipped);
        }
        self.state_machine
            .migrate(sub.company_id, sub.id, &profile.country, now)
            .await?;
        Ok(ItemOutcome::Processed)
    }

    /// Opens the payment and asks the gateway for it. A gateway or validation
    /// failure fails the payment and routes the subscription to GRACE.
    ///
    /// A re-run finds the payment already open. If that attempt failed but the
    /// subscription never left ACTIVE, the failure is routed again.
    async fn charge(
        &self,
        sub: &Subscription,
        adapter: &dyn PaymentGatewayAdapter,
        key: String,
        now: Timestamp,
    ) -> Result<ItemOutcome, BillingError> {
        match self.initiate(sub, adapter, &key, now).await {
            Ok(Initiation::Requested) => Ok(ItemOutcome::Processed),
            Ok(Initiation::AlreadyAttempted(payment)) => {
                self.route_earlier_failure(sub, payment, now).await
            }
            Err(e) if e.is_renewal_failure() => {
                let reason = e.to_string();
                let failed = match self.ledger.fail_initiation(&key, &reason, now).await {
                    Ok(payment) => Some(payment.applied()),
                    Err(BillingError::NotFound { .. }) => None,
                    Err(err) => {
                        tracing::error!(
                            idempotency_key = %key,
                            error = %err,
                            "Could not mark payment failed"
                        );
                        None
                    }
                };
                self.state_machine
                    .on_renewal_failed(sub.company_id, sub.id, &reason, failed, now)
                    .await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn route_earlier_failure(
        &self,
        sub: &Subscription,
        payment: Payment,
        now: Timestamp,
    ) -> Result<ItemOutcome, BillingError> {
        if !matches!(payment.status, PaymentStatus::Failed | PaymentStatus::Timeout) {
            return Ok(ItemOutcome::Skipped);
        }
        let reason = payment
            .failure_reason
            .as_deref()
            .unwrap_or("earlier renewal attempt failed");
        let changed = self
            .state_machine
            .on_renewal_failed(sub.company_id, sub.id, reason, Some(payment.applied()), now)
            .await?;
        Ok(match changed {
            Some(_) => {
                tracing::warn!(
                    subscription_id = %sub.id,
                    payment_id = %payment.id,
                    "Routed earlier failed charge to grace"
                );
                ItemOutcome::Processed
            }
            None => ItemOutcome::Skipped,
        })
    }

    async fn initiate(
        &self,
        sub: &Subscription,
        adapter: &dyn PaymentGatewayAdapter,
        key: &str,
        now: Timestamp,
    ) -> Result<Initiation, BillingError> {
        let plan = self
            .plans
            .find_by_id(sub.plan_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Plan", sub.plan_id))?;
        let contact = self
            .directory
            .find_subscriber(sub.company_id, sub.user_id)
            .await?
            .map(|p| PayerContact {
                name: p.name,
                email: p.email,
                phone: p.phone,
            })
            .unwrap_or_default();

        let payable = Payable::Subscription(sub.id);
        let record = self
            .ledger
            .record_initiation(
                RecordInitiationCommand {
                    company_id: sub.company_id,
                    payable,
                    amount: plan.price.clone(),
                    gateway: sub.gateway,
                    idempotency_key: key.to_string(),
                },
                now,
            )
            .await?;
        if !record.created {
            tracing::debug!(
                subscription_id = %sub.id,
                idempotency_key = %key,
                status = %record.payment.status,
                "Charge already attempted"
            );
            return Ok(Initiation::AlreadyAttempted(record.payment));
        }

        let context = PaymentContext {
            company_id: sub.company_id,
            payable,
            amount: plan.price.clone(),
            reference: plan.code.to_uppercase(),
            description: format!("{} subscription", plan.name),
            idempotency_key: key.to_string(),
            contact,
        };
        let response = adapter
            .initiate_payment(&context)
            .await
            .map_err(|e| e.into_billing(sub.gateway))?;

        self.ledger
            .attach_gateway_reference(key, &response.transaction_id, &response.metadata, now)
            .await?;

        tracing::info!(
            subscription_id = %sub.id,
            company_id = %sub.company_id,
            gateway = %sub.gateway,
            idempotency_key = %key,
            transaction_id = %response.transaction_id,
            "Renewal charge requested"
        );
        Ok(Initiation::Requested)
    }

    async fn sweep<T, F, Fut>(&self, name: &'static str, items: Vec<T>, process: F) -> SweepReport
    where
        T: SweepItem,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<ItemOutcome, BillingError>>,
    {
        let mut report = SweepReport {
            sweep: name,
            examined: items.len(),
            ..Default::default()
        };

        let results: Vec<(String, Result<ItemOutcome, BillingError>)> = stream::iter(items)
            .map(|item| {
                let id = item.entity_id();
                process(item).map(move |result| (id, result))
            })
            .buffer_unordered(self.policy.sweep_concurrency.max(1))
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok(ItemOutcome::Processed) => report.processed += 1,
                Ok(ItemOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        sweep = name,
                        entity_id = %id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Sweep item failed"
                    );
                }
            }
        }

        tracing::info!(
            sweep = name,
            examined = report.examined,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            "Sweep finished"
        );
        report
    }
}
