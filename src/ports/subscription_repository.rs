//! Subscription repository port.
//!
//! Every write carries the audit entry for the transition it persists; the
//! implementation commits both or neither.
//!
//! # Guarantees
//!
//! - At most one open (PENDING, ACTIVE, GRACE) subscription per company.
//!   Violations fail with `ActiveSubscriptionExists`.
//! - Updates are optimistic: the stored `version` must equal the caller's,
//!   otherwise `ConcurrentModification`.
//! - Rows are never deleted.

use async_trait::async_trait;

use crate::domain::billing::Subscription;
use crate::domain::foundation::{AuditEntry, CompanyId, DomainError, SubscriptionId, Timestamp};

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Inserts a new subscription.
    ///
    /// # Errors
    ///
    /// - `ActiveSubscriptionExists` if the company already has an open one
    /// - `DatabaseError` on persistence failure
    async fn insert(&self, subscription: &Subscription, audit: &AuditEntry)
        -> Result<(), DomainError>;

    /// Persists a mutated subscription and returns it with the bumped version.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` if the row is missing
    /// - `ConcurrentModification` if the version moved underneath the caller
    async fn update(
        &self,
        subscription: &Subscription,
        audit: &AuditEntry,
    ) -> Result<Subscription, DomainError>;

    /// Migration: persists the cancelled subscription and inserts its successor
    /// in one transaction.
    async fn replace(
        &self,
        cancelled: &Subscription,
        successor: &Subscription,
        audit: &[AuditEntry],
    ) -> Result<(), DomainError>;

    async fn find_by_id(
        &self,
        company_id: CompanyId,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Lookup by the card gateway's subscription id. Used to attribute
    /// gateway-driven renewal callbacks.
    async fn find_by_gateway_subscription_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    /// The company's PENDING, ACTIVE or GRACE subscription, if any.
    async fn find_open_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Option<Subscription>, DomainError>;

    /// ACTIVE, auto-renewing, `next_billing_at <= now`.
    async fn find_due_for_renewal(&self, now: Timestamp) -> Result<Vec<Subscription>, DomainError>;

    /// Every GRACE subscription.
    async fn find_in_grace(&self) -> Result<Vec<Subscription>, DomainError>;

    /// GRACE with `ends_at <= now`.
    async fn find_grace_expired(&self, now: Timestamp) -> Result<Vec<Subscription>, DomainError>;

    /// ACTIVE, auto-renewing, `now < next_billing_at <= until`.
    async fn find_billing_between(
        &self,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// ACTIVE or GRACE.
    async fn find_billable(&self) -> Result<Vec<Subscription>, DomainError>;
}
