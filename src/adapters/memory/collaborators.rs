//! In-memory plan catalog, subscriber directory and notifier.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::domain::billing::{CountryCode, SubscriptionPlan};
use crate::domain::foundation::{CompanyId, DomainError, ErrorCode, PlanId, UserId};
use crate::ports::{
    BillingNotice, NoticeSubject, Notifier, PlanCatalog, SubscriberDirectory, SubscriberProfile,
};

/// Fixed set of plans.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPlanCatalog {
    plans: Vec<SubscriptionPlan>,
}

impl InMemoryPlanCatalog {
    pub fn new(plans: Vec<SubscriptionPlan>) -> Self {
        Self { plans }
    }

    pub fn with_plan(mut self, plan: SubscriptionPlan) -> Self {
        self.plans.push(plan);
        self
    }
}

#[async_trait]
impl PlanCatalog for InMemoryPlanCatalog {
    async fn find_by_id(&self, id: PlanId) -> Result<Option<SubscriptionPlan>, DomainError> {
        Ok(self.plans.iter().find(|p| p.id == id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<SubscriptionPlan>, DomainError> {
        Ok(self.plans.iter().find(|p| p.code == code).cloned())
    }
}

/// Mutable subscriber profiles keyed by company and user.
#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriberDirectory {
    profiles: Arc<RwLock<HashMap<(CompanyId, UserId), SubscriberProfile>>>,
}

impl InMemorySubscriberDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, profile: SubscriberProfile) {
        self.profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((profile.company_id, profile.user_id), profile);
    }

    /// Moves a subscriber to another country.
    pub fn set_country(&self, company_id: CompanyId, user_id: UserId, country: CountryCode) {
        if let Some(profile) = self
            .profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&(company_id, user_id))
        {
            profile.country = country;
        }
    }
}

#[async_trait]
impl SubscriberDirectory for InMemorySubscriberDirectory {
    async fn find_subscriber(
        &self,
        company_id: CompanyId,
        user_id: UserId,
    ) -> Result<Option<SubscriberProfile>, DomainError> {
        Ok(self
            .profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(company_id, user_id))
            .cloned())
    }
}

/// Records notices for assertions; can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<RwLock<Vec<(BillingNotice, NoticeSubject)>>>,
    failing: Arc<RwLock<bool>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent `notify` fails with `NotificationFailed`.
    pub fn fail_all(&self) {
        *self.failing.write().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn sent(&self) -> Vec<(BillingNotice, NoticeSubject)> {
        self.sent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, notice: BillingNotice) -> usize {
        self.sent().iter().filter(|(n, _)| *n == notice).count()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notice: BillingNotice, subject: NoticeSubject) -> Result<(), DomainError> {
        if *self.failing.read().unwrap_or_else(PoisonError::into_inner) {
            return Err(DomainError::new(
                ErrorCode::NotificationFailed,
                format!("{} could not be delivered", notice),
            ));
        }
        self.sent
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((notice, subject));
        Ok(())
    }
}
