//! Invoice repository port.

use async_trait::async_trait;

use crate::domain::foundation::{AuditEntry, CompanyId, DomainError, InvoiceId};
use crate::domain::invoice::{Invoice, InvoiceSnapshot};

/// Invoice and snapshot persistence.
///
/// Implementations must make [`InvoiceRepository::finalize`] atomic: the
/// conditional DRAFT to FINALIZED update, the snapshot insert and the audit
/// entry commit together. Concurrent finalizations of one invoice produce
/// exactly one snapshot; the loser sees `InvalidStateTransition`.
#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn insert(&self, invoice: &Invoice) -> Result<(), DomainError>;

    /// Saves edits to a draft.
    ///
    /// # Errors
    ///
    /// - `InvalidStateTransition` if the stored invoice is no longer a draft
    async fn update_draft(&self, invoice: &Invoice) -> Result<(), DomainError>;

    async fn find_by_id(
        &self,
        company_id: CompanyId,
        id: InvoiceId,
    ) -> Result<Option<Invoice>, DomainError>;

    async fn find_snapshot(
        &self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<Option<InvoiceSnapshot>, DomainError>;

    /// Seals the invoice and stores its snapshot.
    ///
    /// # Errors
    ///
    /// - `InvoiceNotFound` if the invoice is missing
    /// - `InvalidStateTransition` if the stored invoice is not a draft
    /// - `SnapshotExists` if a snapshot is already stored
    async fn finalize(
        &self,
        invoice: &Invoice,
        snapshot: &InvoiceSnapshot,
        audit: &AuditEntry,
    ) -> Result<(), DomainError>;

    /// Status-only write of the compliance reference.
    async fn save_compliance_reference(
        &self,
        invoice: &Invoice,
        audit: &AuditEntry,
    ) -> Result<(), DomainError>;
}
