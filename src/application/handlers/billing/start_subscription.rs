//! StartSubscriptionHandler - Signs a company up and requests the first payment.
//!
//! The gateway follows the subscriber's country. The subscription stays
//! PENDING until the gateway callback confirms the payment. A signup whose
//! first attempt failed can be started again; the PENDING subscription is
//! reused and a fresh attempt is keyed off it.

use std::sync::Arc;

use crate::domain::billing::{BillingError, PaymentGateway, Subscription, SubscriptionPlan, SubscriptionStatus};
use crate::domain::foundation::{AuditEntry, CompanyId, PaymentId, PlanId, Timestamp, UserId};
use crate::domain::payment::{Payable, PaymentStatus};
use crate::ports::{
    PayerContact, PaymentContext, PlanCatalog, SubscriberDirectory, SubscriberProfile,
    SubscriptionRepository,
};

use super::{GatewayRegistry, PaymentLedger, RecordInitiationCommand};

/// How the caller names the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSelector {
    Id(PlanId),
    Code(String),
}

#[derive(Debug, Clone)]
pub struct StartSubscriptionCommand {
    pub company_id: CompanyId,
    pub user_id: UserId,
    pub plan: PlanSelector,
    pub auto_renew: bool,
}

#[derive(Debug, Clone)]
pub struct StartSubscriptionResult {
    pub subscription: Subscription,
    pub payment_id: PaymentId,
    pub gateway: PaymentGateway,
    /// Checkout request id or payment intent id.
    pub transaction_id: String,
    /// Present for card payments; the client completes the charge with it.
    pub client_secret: Option<String>,
    /// True when an earlier PENDING signup was picked up again.
    pub resumed: bool,
}

pub struct StartSubscriptionHandler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    plans: Arc<dyn PlanCatalog>,
    directory: Arc<dyn SubscriberDirectory>,
    gateways: GatewayRegistry,
    ledger: Arc<PaymentLedger>,
}

impl StartSubscriptionHandler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        plans: Arc<dyn PlanCatalog>,
        directory: Arc<dyn SubscriberDirectory>,
        gateways: GatewayRegistry,
        ledger: Arc<PaymentLedger>,
    ) -> Self {
        Self {
            subscriptions,
            plans,
            directory,
            gateways,
            ledger,
        }
    }

    pub async fn handle(
        &self,
        cmd: StartSubscriptionCommand,
        now: Timestamp,
    ) -> Result<StartSubscriptionResult, BillingError> {
        // 1. Plan and subscriber
        let plan = self.find_plan(&cmd.plan).await?;
        let profile = self
            .directory
            .find_subscriber(cmd.company_id, cmd.user_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Subscriber", cmd.user_id))?;
        let gateway = PaymentGateway::for_country(&profile.country);
        let adapter = self.gateways.get(gateway)?;

        // 2. New PENDING subscription, or the one an earlier attempt left behind
        let (subscription, resumed) = match self
            .subscriptions
            .find_open_for_company(cmd.company_id)
            .await?
        {
            Some(open) => (self.resumable(open, &plan)?, true),
            None => {
                let subscription = Subscription::pending(
                    cmd.company_id,
                    cmd.user_id,
                    &plan,
                    gateway,
                    cmd.auto_renew,
                    now,
                );
                let audit = AuditEntry::system(
                    "subscription.created",
                    "subscription",
                    subscription.id,
                    subscription.company_id,
                )
                .with_metadata(serde_json::json!({
                    "plan": plan.code,
                    "gateway": gateway,
                    "country": profile.country,
                    "status": subscription.status,
                }))
                .at(now);
                self.subscriptions.insert(&subscription, &audit).await?;
                (subscription, false)
            }
        };

        // 3. Open the payment before calling out
        let key = self.next_attempt_key(&subscription).await?;
        let record = self
            .ledger
            .record_initiation(
                RecordInitiationCommand {
                    company_id: subscription.company_id,
                    payable: Payable::Subscription(subscription.id),
                    amount: plan.price.clone(),
                    gateway: subscription.gateway,
                    idempotency_key: key.clone(),
                },
                now,
            )
            .await?;

        // 4. Ask the gateway
        let context = PaymentContext {
            company_id: subscription.company_id,
            payable: Payable::Subscription(subscription.id),
            amount: plan.price.clone(),
            reference: plan.code.to_uppercase(),
            description: format!("{} subscription", plan.name),
            idempotency_key: key.clone(),
            contact: contact(&profile),
        };
        let response = match adapter.initiate_payment(&context).await {
            Ok(response) => response,
            Err(e) => {
                let err = e.into_billing(subscription.gateway);
                self.ledger
                    .fail_initiation(&key, &err.to_string(), now)
                    .await?;
                return Err(err);
            }
        };
        self.ledger
            .attach_gateway_reference(&key, &response.transaction_id, &response.metadata, now)
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            company_id = %subscription.company_id,
            gateway = %subscription.gateway,
            idempotency_key = %key,
            resumed,
            "Subscription signup payment requested"
        );

        Ok(StartSubscriptionResult {
            subscription,
            payment_id: record.payment.id,
            gateway,
            transaction_id: response.transaction_id,
            client_secret: response.client_secret,
            resumed,
        })
    }

    async fn find_plan(&self, selector: &PlanSelector) -> Result<SubscriptionPlan, BillingError> {
        let plan = match selector {
            PlanSelector::Id(id) => self.plans.find_by_id(*id).await?,
            PlanSelector::Code(code) => self.plans.find_by_code(code).await?,
        };
        plan.ok_or_else(|| match selector {
            PlanSelector::Id(id) => BillingError::not_found("Plan", id),
            PlanSelector::Code(code) => BillingError::not_found("Plan", code),
        })
    }

    /// Only a PENDING signup for the same plan may be picked up again.
    fn resumable(
        &self,
        open: Subscription,
        plan: &SubscriptionPlan,
    ) -> Result<Subscription, BillingError> {
        if open.status != SubscriptionStatus::Pending {
            return Err(BillingError::conflict(format!(
                "company {} already has a {} subscription",
                open.company_id, open.status
            )));
        }
        if open.plan_id != plan.id {
            return Err(BillingError::conflict(format!(
                "company {} has a pending signup for another plan",
                open.company_id
            )));
        }
        Ok(open)
    }

    /// First attempt uses the bare signup key; later ones append the attempt
    /// number. An attempt still awaiting its callback blocks a new one.
    async fn next_attempt_key(&self, subscription: &Subscription) -> Result<String, BillingError> {
        let attempts = self
            .ledger
            .payments_for(subscription.company_id, Payable::Subscription(subscription.id))
            .await?;
        if attempts.iter().any(|p| p.status == PaymentStatus::Initiated) {
            return Err(BillingError::precondition(format!(
                "subscription {} already has a payment in progress",
                subscription.id
            )));
        }
        let base = subscription.signup_idempotency_key();
        Ok(match attempts.len() {
            0 => base,
            n => format!("{}:{}", base, n + 1),
        })
    }
}

fn contact(profile: &SubscriberProfile) -> PayerContact {
    PayerContact {
        name: profile.name.clone(),
        email: profile.email.clone(),
        phone: profile.phone.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::billing::test_support::{at, Fixture};
    use crate::ports::GatewayError;

    fn handler(fx: &Fixture) -> StartSubscriptionHandler {
        StartSubscriptionHandler::new(
            Arc::new(fx.store.clone()),
            Arc::new(fx.plans.clone()),
            Arc::new(fx.directory.clone()),
            fx.registry(),
            fx.ledger(),
        )
    }

    fn command(company_id: CompanyId, user_id: UserId) -> StartSubscriptionCommand {
        StartSubscriptionCommand {
            company_id,
            user_id,
            plan: PlanSelector::Code("growth".to_string()),
            auto_renew: true,
        }
    }

    #[tokio::test]
    async fn kenyan_subscriber_gets_mobile_money() {
        let fx = Fixture::new();
        let (company_id, user_id) = fx.subscriber(PaymentGateway::MobileMoney);

        let result = handler(&fx)
            .handle(command(company_id, user_id), at(2026, 1, 1))
            .await
            .unwrap();

        assert_eq!(result.gateway, PaymentGateway::MobileMoney);
        assert_eq!(result.subscription.status, SubscriptionStatus::Pending);
        assert_eq!(result.transaction_id, fx.mobile.transaction_id(0));
        assert!(result.client_secret.is_none());
        let initiation = &fx.mobile.initiations()[0];
        assert_eq!(initiation.idempotency_key, result.subscription.signup_idempotency_key());
        assert_eq!(initiation.contact.phone.as_deref(), Some("0712345678"));
        assert_eq!(
            fx.store.all_payments().await[0].gateway_transaction_id.as_deref(),
            Some(result.transaction_id.as_str())
        );
    }

    #[tokio::test]
    async fn card_subscriber_receives_client_secret() {
        let fx = Fixture::new();
        let (company_id, user_id) = fx.subscriber(PaymentGateway::Card);

        let result = handler(&fx)
            .handle(command(company_id, user_id), at(2026, 1, 1))
            .await
            .unwrap();

        assert_eq!(result.gateway, PaymentGateway::Card);
        assert_eq!(result.client_secret.as_deref(), Some("secret_1"));
    }

    #[tokio::test]
    async fn active_subscription_blocks_signup() {
        let fx = Fixture::new();
        let active = fx.active_subscription(PaymentGateway::MobileMoney, at(2026, 1, 1)).await;

        let err = handler(&fx)
            .handle(command(active.company_id, active.user_id), at(2026, 1, 2))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Conflict(_)));
        assert!(fx.mobile.initiations().is_empty());
    }

    #[tokio::test]
    async fn failed_first_attempt_can_be_retried() {
        let fx = Fixture::new();
        let (company_id, user_id) = fx.subscriber(PaymentGateway::MobileMoney);
        fx.mobile.fail_next_initiation(GatewayError::transport("timeout"));
        let handler = handler(&fx);

        let err = handler
            .handle(command(company_id, user_id), at(2026, 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::GatewayTransport { .. }));

        let retry = handler
            .handle(command(company_id, user_id), at(2026, 1, 1))
            .await
            .unwrap();

        assert!(retry.resumed);
        let payments = fx.store.all_payments().await;
        assert_eq!(payments.len(), 2);
        assert_eq!(payments[0].status, PaymentStatus::Failed);
        assert_eq!(
            payments[1].idempotency_key,
            format!("{}:2", retry.subscription.signup_idempotency_key())
        );
        assert_eq!(fx.store.all_subscriptions().await.len(), 1);
    }

    #[tokio::test]
    async fn attempt_in_progress_blocks_another() {
        let fx = Fixture::new();
        let (company_id, user_id) = fx.subscriber(PaymentGateway::MobileMoney);
        let handler = handler(&fx);
        handler
            .handle(command(company_id, user_id), at(2026, 1, 1))
            .await
            .unwrap();

        let err = handler
            .handle(command(company_id, user_id), at(2026, 1, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Precondition(_)));
    }

    #[tokio::test]
    async fn unknown_plan_is_not_found() {
        let fx = Fixture::new();
        let (company_id, user_id) = fx.subscriber(PaymentGateway::MobileMoney);
        let mut cmd = command(company_id, user_id);
        cmd.plan = PlanSelector::Code("enterprise".to_string());

        let err = handler(&fx).handle(cmd, at(2026, 1, 1)).await.unwrap_err();

        assert!(matches!(err, BillingError::NotFound { entity: "Plan", .. }));
    }

    #[tokio::test]
    async fn missing_subscriber_is_not_found() {
        let fx = Fixture::new();

        let err = handler(&fx)
            .handle(command(CompanyId::new(), UserId::new()), at(2026, 1, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::NotFound { entity: "Subscriber", .. }));
    }
}
