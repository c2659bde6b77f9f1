//! Shared wiring for integration tests. Everything runs on the in-memory
//! adapters and scriptable gateways.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use secrecy::SecretString;

use invoicer_billing::adapters::memory::{
    InMemoryBillingStore, InMemoryNotifier, InMemoryPlanCatalog, InMemorySubscriberDirectory,
    MockGatewayAdapter,
};
use invoicer_billing::application::{
    BillingPolicy, CallbackVerifier, GatewayRegistry, HandleGatewayCallbackHandler,
    InvoiceFinalizer, PayInvoiceHandler, PaymentLedger, RenewalScheduler,
    StartSubscriptionHandler, SubscriptionStateMachine,
};
use invoicer_billing::domain::billing::{
    BillingPeriod, BodySignatureVerifier, CountryCode, PaymentGateway, PlanLimits, Subscription,
    SubscriptionPlan, TimestampedSignatureVerifier,
};
use invoicer_billing::domain::foundation::{
    AuditEntry, CompanyId, Currency, Money, PlanId, Timestamp, UserId,
};
use invoicer_billing::ports::{SubscriberProfile, SubscriptionRepository};

pub const MPESA_SECRET: &str = "mpesa-callback-secret";
pub const STRIPE_SECRET: &str = "whsec_integration_secret";

/// 09:00 UTC on the given day.
pub fn at(y: i32, m: u32, d: u32) -> Timestamp {
    Timestamp::from_datetime(Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap())
}

pub struct Harness {
    pub store: InMemoryBillingStore,
    pub plans: InMemoryPlanCatalog,
    pub directory: InMemorySubscriberDirectory,
    pub notifier: InMemoryNotifier,
    pub mobile: MockGatewayAdapter,
    pub card: MockGatewayAdapter,
    pub plan: SubscriptionPlan,
    pub policy: BillingPolicy,
}

impl Harness {
    /// One monthly "starter" plan priced at 1,000.00 KES.
    pub fn new() -> Self {
        let plan = SubscriptionPlan {
            id: PlanId::new(),
            code: "starter".to_string(),
            name: "Starter".to_string(),
            price: Money::new(100_000, Currency::kes()),
            billing_period: BillingPeriod::Monthly,
            limits: PlanLimits::default(),
        };
        Self {
            store: InMemoryBillingStore::new(),
            plans: InMemoryPlanCatalog::new(vec![plan.clone()]),
            directory: InMemorySubscriberDirectory::new(),
            notifier: InMemoryNotifier::new(),
            mobile: MockGatewayAdapter::mobile_money(),
            card: MockGatewayAdapter::card(),
            plan,
            policy: BillingPolicy::default(),
        }
    }

    pub fn registry(&self) -> GatewayRegistry {
        GatewayRegistry::new()
            .with(Arc::new(self.mobile.clone()))
            .with(Arc::new(self.card.clone()))
    }

    pub fn ledger(&self) -> Arc<PaymentLedger> {
        Arc::new(PaymentLedger::new(Arc::new(self.store.clone())))
    }

    pub fn state_machine(&self) -> Arc<SubscriptionStateMachine> {
        Arc::new(SubscriptionStateMachine::new(
            Arc::new(self.store.clone()),
            Arc::new(self.plans.clone()),
            Arc::new(self.notifier.clone()),
            self.registry(),
            self.policy,
        ))
    }

    pub fn scheduler(&self) -> RenewalScheduler {
        RenewalScheduler::new(
            Arc::new(self.store.clone()),
            Arc::new(self.plans.clone()),
            Arc::new(self.directory.clone()),
            self.registry(),
            self.ledger(),
            self.state_machine(),
            self.policy,
        )
    }

    pub fn start_subscription(&self) -> StartSubscriptionHandler {
        StartSubscriptionHandler::new(
            Arc::new(self.store.clone()),
            Arc::new(self.plans.clone()),
            Arc::new(self.directory.clone()),
            self.registry(),
            self.ledger(),
        )
    }

    pub fn pay_invoice(&self) -> PayInvoiceHandler {
        PayInvoiceHandler::new(Arc::new(self.store.clone()), self.registry(), self.ledger())
    }

    pub fn finalizer(&self) -> InvoiceFinalizer {
        InvoiceFinalizer::new(Arc::new(self.store.clone()))
    }

    /// Callback handler with both gateways' signature verifiers installed.
    pub fn callbacks(&self) -> HandleGatewayCallbackHandler {
        HandleGatewayCallbackHandler::new(
            self.registry(),
            Arc::new(self.store.clone()),
            self.ledger(),
            self.state_machine(),
            Arc::new(self.notifier.clone()),
        )
        .with_verifier(
            PaymentGateway::MobileMoney,
            CallbackVerifier::Body(
                BodySignatureVerifier::new(SecretString::new(MPESA_SECRET.to_string())).unwrap(),
            ),
        )
        .with_verifier(
            PaymentGateway::Card,
            CallbackVerifier::Timestamped(
                TimestampedSignatureVerifier::new(SecretString::new(STRIPE_SECRET.to_string()))
                    .unwrap(),
            ),
        )
    }

    /// Registers a subscriber in Kenya (mobile money) or the US (card).
    pub fn subscriber(&self, gateway: PaymentGateway) -> (CompanyId, UserId) {
        let company_id = CompanyId::new();
        let user_id = UserId::new();
        let country = match gateway {
            PaymentGateway::MobileMoney => CountryCode::kenya(),
            PaymentGateway::Card => CountryCode::new("US").unwrap(),
        };
        self.directory.upsert(SubscriberProfile {
            company_id,
            user_id,
            name: Some("Kamau Hardware".to_string()),
            email: Some("accounts@kamau.example".to_string()),
            phone: Some("0712345678".to_string()),
            country,
        });
        (company_id, user_id)
    }

    pub async fn active_subscription(&self, gateway: PaymentGateway, now: Timestamp) -> Subscription {
        let (company_id, user_id) = self.subscriber(gateway);
        let mut sub = Subscription::pending(company_id, user_id, &self.plan, gateway, true, now);
        sub.activate(self.plan.billing_period, now).unwrap();
        let audit = AuditEntry::system("subscription.created", "subscription", sub.id, company_id);
        SubscriptionRepository::insert(&self.store, &sub, &audit)
            .await
            .unwrap();
        sub
    }

    pub async fn reload(&self, sub: &Subscription) -> Subscription {
        SubscriptionRepository::find_by_id(&self.store, sub.company_id, sub.id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn audit_count(&self, action: &str) -> usize {
        self.store
            .audit_actions()
            .await
            .into_iter()
            .filter(|a| a == action)
            .count()
    }
}
