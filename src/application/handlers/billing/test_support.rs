//! Shared wiring for billing handler tests.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use crate::adapters::memory::{
    InMemoryBillingStore, InMemoryNotifier, InMemoryPlanCatalog, InMemorySubscriberDirectory,
    MockGatewayAdapter,
};
use crate::domain::billing::{
    AppliedPayment, BillingPeriod, CountryCode, PaymentGateway, PlanLimits, Subscription,
    SubscriptionPlan,
};
use crate::domain::foundation::{
    AuditEntry, CompanyId, Currency, Money, PaymentId, PlanId, Timestamp, UserId,
};
use crate::domain::invoice::{Invoice, InvoiceSnapshot, LineItem, Party};
use crate::ports::{InvoiceRepository, SubscriberProfile, SubscriptionRepository};

use super::{BillingPolicy, GatewayRegistry, PaymentLedger, RenewalScheduler, SubscriptionStateMachine};

pub fn at(y: i32, m: u32, d: u32) -> Timestamp {
    Timestamp::from_datetime(Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap())
}

/// A fresh payment initiated at `initiated_at`.
pub fn payment_at(initiated_at: Timestamp) -> AppliedPayment {
    AppliedPayment {
        payment_id: PaymentId::new(),
        initiated_at,
    }
}

pub struct Fixture {
    pub store: InMemoryBillingStore,
    pub plans: InMemoryPlanCatalog,
    pub directory: InMemorySubscriberDirectory,
    pub notifier: InMemoryNotifier,
    pub mobile: MockGatewayAdapter,
    pub card: MockGatewayAdapter,
    pub plan: SubscriptionPlan,
    pub policy: BillingPolicy,
}

impl Fixture {
    pub fn new() -> Self {
        let plan = SubscriptionPlan {
            id: PlanId::new(),
            code: "growth".to_string(),
            name: "Growth".to_string(),
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

    /// Registers a subscriber in the country matching `gateway`.
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
            name: Some("Wanjiku Traders".to_string()),
            email: Some("billing@example.com".to_string()),
            phone: Some("0712345678".to_string()),
            country,
        });
        (company_id, user_id)
    }

    pub async fn pending_subscription(&self, gateway: PaymentGateway, now: Timestamp) -> Subscription {
        let (company_id, user_id) = self.subscriber(gateway);
        let sub = Subscription::pending(company_id, user_id, &self.plan, gateway, true, now);
        self.insert(&sub).await;
        sub
    }

    pub async fn active_subscription(&self, gateway: PaymentGateway, now: Timestamp) -> Subscription {
        let (company_id, user_id) = self.subscriber(gateway);
        let mut sub = Subscription::pending(company_id, user_id, &self.plan, gateway, true, now);
        sub.activate(self.plan.billing_period, now).unwrap();
        self.insert(&sub).await;
        sub
    }

    pub async fn insert(&self, sub: &Subscription) {
        let audit = AuditEntry::system("subscription.created", "subscription", sub.id, sub.company_id);
        SubscriptionRepository::insert(&self.store, sub, &audit)
            .await
            .unwrap();
    }

    pub async fn reload(&self, sub: &Subscription) -> Subscription {
        SubscriptionRepository::find_by_id(&self.store, sub.company_id, sub.id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn open_subscription(&self, company_id: CompanyId) -> Option<Subscription> {
        self.store.find_open_for_company(company_id).await.unwrap()
    }

    /// Finalized KES invoice with a grand total of 11,600 minor units.
    pub async fn finalized_invoice(&self, company_id: CompanyId, now: Timestamp) -> Invoice {
        let mut invoice = Invoice::draft(
            company_id,
            "INV-0042",
            Currency::kes(),
            Party::default(),
            Party::default(),
            now,
        );
        invoice
            .replace_line_items(vec![LineItem::new("Consulting", 1, 10_000, 1_600)], now)
            .unwrap();
        InvoiceRepository::insert(&self.store, &invoice).await.unwrap();
        let snapshot = InvoiceSnapshot::capture(&invoice, now).unwrap();
        invoice.finalize(now).unwrap();
        let audit = AuditEntry::system("invoice.finalized", "invoice", invoice.id, company_id);
        InvoiceRepository::finalize(&self.store, &invoice, &snapshot, &audit)
            .await
            .unwrap();
        invoice
    }
}
