//! Read-only plan catalog.

use async_trait::async_trait;

use crate::domain::billing::SubscriptionPlan;
use crate::domain::foundation::{DomainError, PlanId};

#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn find_by_id(&self, id: PlanId) -> Result<Option<SubscriptionPlan>, DomainError>;

    async fn find_by_code(&self, code: &str) -> Result<Option<SubscriptionPlan>, DomainError>;
}
