//! Read access to subscriber contact details and country.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::billing::CountryCode;
use crate::domain::foundation::{CompanyId, DomainError, UserId};

/// The billing-relevant view of the user behind a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberProfile {
    pub company_id: CompanyId,
    pub user_id: UserId,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,

    /// Current country. Drives gateway selection and migration.
    pub country: CountryCode,
}

#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    async fn find_subscriber(
        &self,
        company_id: CompanyId,
        user_id: UserId,
    ) -> Result<Option<SubscriberProfile>, DomainError>;
}
