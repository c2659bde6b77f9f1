//! Payment ledger storage port.
//!
//! Writes go through a [`LedgerTransaction`] so the idempotency lookup, the
//! payment write, the invoice paid-status recomputation and the audit entry
//! form a single atomic unit. Dropping a transaction without committing rolls
//! it back.

use async_trait::async_trait;

use crate::domain::billing::PaymentGateway;
use crate::domain::foundation::{AuditEntry, CompanyId, DomainError, InvoiceId, Timestamp};
use crate::domain::invoice::{Invoice, InvoiceSnapshot};
use crate::domain::payment::{Payable, Payment};

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Opens a ledger transaction.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, DomainError>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>, DomainError>;

    /// INITIATED payments created before `cutoff`.
    async fn find_stale_initiated(&self, cutoff: Timestamp) -> Result<Vec<Payment>, DomainError>;

    async fn list_for_payable(
        &self,
        company_id: CompanyId,
        payable: Payable,
    ) -> Result<Vec<Payment>, DomainError>;
}

/// One atomic ledger unit. Row reads lock the row until commit.
#[async_trait]
pub trait LedgerTransaction: Send {
    async fn payment_by_idempotency_key(&mut self, key: &str)
        -> Result<Option<Payment>, DomainError>;

    async fn payment_by_gateway_transaction_id(
        &mut self,
        gateway: PaymentGateway,
        transaction_id: &str,
    ) -> Result<Option<Payment>, DomainError>;

    /// # Errors
    ///
    /// - `DuplicateIdempotencyKey` if the key is taken
    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), DomainError>;

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), DomainError>;

    /// Sum of SUCCESS payments for the invoice, in minor units.
    async fn successful_total_for_invoice(
        &mut self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<i64, DomainError>;

    async fn invoice_for_update(
        &mut self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<Option<Invoice>, DomainError>;

    async fn invoice_snapshot(
        &mut self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<Option<InvoiceSnapshot>, DomainError>;

    /// Status-only write: sets PAID and `paid_at`. Financial fields untouched.
    async fn mark_invoice_paid(
        &mut self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
        paid_at: Timestamp,
    ) -> Result<(), DomainError>;

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<(), DomainError>;

    async fn commit(self: Box<Self>) -> Result<(), DomainError>;
}
