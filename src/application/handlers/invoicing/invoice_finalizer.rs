//! InvoiceFinalizer - Seals a draft invoice together with its snapshot.
//!
//! Finalization captures the snapshot from the live rows and hands both the
//! snapshot and the status flip to the store as one unit. After that the
//! snapshot is the only source for anything printed, paid or reported; later
//! edits to live rows never reach it.

use std::sync::Arc;

use serde_json::json;

use crate::domain::billing::BillingError;
use crate::domain::foundation::{AuditEntry, CompanyId, InvoiceId, Timestamp};
use crate::domain::invoice::{Invoice, InvoiceSnapshot};
use crate::ports::InvoiceRepository;

/// A freshly sealed invoice and the snapshot stored with it.
#[derive(Debug, Clone)]
pub struct FinalizedInvoice {
    pub invoice: Invoice,
    pub snapshot: InvoiceSnapshot,
}

pub struct InvoiceFinalizer {
    invoices: Arc<dyn InvoiceRepository>,
}

impl InvoiceFinalizer {
    pub fn new(invoices: Arc<dyn InvoiceRepository>) -> Self {
        Self { invoices }
    }

    /// DRAFT to FINALIZED with its snapshot.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the invoice does not exist for this company
    /// - `Precondition` if it is not a draft, including when a concurrent
    ///   finalization won
    /// - `Conflict` if a snapshot already exists
    pub async fn finalize(
        &self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
        now: Timestamp,
    ) -> Result<FinalizedInvoice, BillingError> {
        let mut invoice = self.load(company_id, invoice_id).await?;

        let snapshot = InvoiceSnapshot::capture(&invoice, now)?;
        invoice.finalize(now)?;

        let audit = AuditEntry::system("invoice.finalized", "invoice", invoice.id, company_id)
            .with_metadata(json!({
                "number": invoice.number,
                "snapshot_id": snapshot.id,
                "grand_total_minor": snapshot.grand_total().amount_minor(),
                "currency": snapshot.currency,
                "content_hash": snapshot.content_hash,
            }))
            .at(now);
        self.invoices.finalize(&invoice, &snapshot, &audit).await?;

        tracing::info!(
            invoice_id = %invoice.id,
            company_id = %company_id,
            number = %invoice.number,
            grand_total_minor = snapshot.grand_total().amount_minor(),
            "Invoice finalized"
        );
        Ok(FinalizedInvoice { invoice, snapshot })
    }

    /// The sealed view of a finalized or paid invoice.
    ///
    /// # Errors
    ///
    /// - `Precondition` if the invoice is still a draft
    /// - `Infrastructure` if the stored snapshot no longer matches its
    ///   content hash
    pub async fn snapshot(
        &self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<InvoiceSnapshot, BillingError> {
        let invoice = self.load(company_id, invoice_id).await?;
        if invoice.is_draft() {
            return Err(BillingError::precondition(format!(
                "Invoice {} is not finalized",
                invoice.number
            )));
        }
        let snapshot = self
            .invoices
            .find_snapshot(company_id, invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("InvoiceSnapshot", invoice_id))?;

        if !snapshot.verify_integrity() {
            tracing::error!(
                invoice_id = %invoice_id,
                snapshot_id = %snapshot.id,
                "Snapshot content hash mismatch"
            );
            return Err(BillingError::infrastructure(format!(
                "snapshot {} of invoice {} failed its integrity check",
                snapshot.id, invoice.number
            )));
        }
        Ok(snapshot)
    }

    /// Stores the tax-authority reference on a sealed invoice. Repeating the
    /// same reference is a no-op.
    pub async fn record_compliance_reference(
        &self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
        reference: &str,
        now: Timestamp,
    ) -> Result<Invoice, BillingError> {
        let mut invoice = self.load(company_id, invoice_id).await?;
        if invoice.compliance_reference.as_deref() == Some(reference) {
            return Ok(invoice);
        }
        invoice.record_compliance_reference(reference, now)?;

        let audit = AuditEntry::system(
            "invoice.compliance_recorded",
            "invoice",
            invoice.id,
            company_id,
        )
        .with_metadata(json!({ "compliance_reference": reference, "status": invoice.status }))
        .at(now);
        self.invoices
            .save_compliance_reference(&invoice, &audit)
            .await?;

        tracing::info!(
            invoice_id = %invoice.id,
            company_id = %company_id,
            compliance_reference = %reference,
            "Compliance reference recorded"
        );
        Ok(invoice)
    }

    async fn load(
        &self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<Invoice, BillingError> {
        self.invoices
            .find_by_id(company_id, invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::domain::foundation::{Currency, Money};
    use crate::domain::invoice::{InvoiceStatus, LineItem, Party};

    // ════════════════════════════════════════════════════════════════════════════
    // Test Helpers
    // ════════════════════════════════════════════════════════════════════════════

    fn finalizer(store: &InMemoryBillingStore) -> InvoiceFinalizer {
        InvoiceFinalizer::new(Arc::new(store.clone()))
    }

    async fn draft(store: &InMemoryBillingStore) -> Invoice {
        let now = Timestamp::now();
        let mut invoice = Invoice::draft(
            CompanyId::new(),
            "INV-0100",
            Currency::kes(),
            Party {
                name: "Acme Ltd".to_string(),
                tax_id: Some("P051234567X".to_string()),
                ..Default::default()
            },
            Party {
                name: "Wanjiku Traders".to_string(),
                ..Default::default()
            },
            now,
        );
        invoice
            .replace_line_items(
                vec![
                    LineItem::new("Design", 2, 5_000, 1_600),
                    LineItem::new("Hosting", 1, 2_000, 320),
                ],
                now,
            )
            .unwrap();
        invoice.set_discount(920, now).unwrap();
        InvoiceRepository::insert(store, &invoice).await.unwrap();
        invoice
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Finalize Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn finalize_seals_invoice_with_snapshot() {
        let store = InMemoryBillingStore::new();
        let invoice = draft(&store).await;

        let sealed = finalizer(&store)
            .finalize(invoice.company_id, invoice.id, Timestamp::now())
            .await
            .unwrap();

        assert_eq!(sealed.invoice.status, InvoiceStatus::Finalized);
        assert_eq!(sealed.snapshot.grand_total(), &Money::new(13_000, Currency::kes()));
        assert!(sealed.snapshot.verify_integrity());
        assert!(store
            .audit_actions()
            .await
            .contains(&"invoice.finalized".to_string()));
    }

    #[tokio::test]
    async fn finalize_twice_is_rejected() {
        let store = InMemoryBillingStore::new();
        let invoice = draft(&store).await;
        let finalizer = finalizer(&store);
        finalizer
            .finalize(invoice.company_id, invoice.id, Timestamp::now())
            .await
            .unwrap();

        let err = finalizer
            .finalize(invoice.company_id, invoice.id, Timestamp::now())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Precondition(_)));
    }

    #[tokio::test]
    async fn concurrent_finalizations_store_one_snapshot() {
        let store = InMemoryBillingStore::new();
        let invoice = draft(&store).await;
        let finalizer = finalizer(&store);
        let now = Timestamp::now();

        let (a, b) = tokio::join!(
            finalizer.finalize(invoice.company_id, invoice.id, now),
            finalizer.finalize(invoice.company_id, invoice.id, now),
        );

        assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);
        let finalized_entries = store
            .audit_actions()
            .await
            .into_iter()
            .filter(|a| a == "invoice.finalized")
            .count();
        assert_eq!(finalized_entries, 1);
    }

    #[tokio::test]
    async fn finalize_is_scoped_by_company() {
        let store = InMemoryBillingStore::new();
        let invoice = draft(&store).await;

        let err = finalizer(&store)
            .finalize(CompanyId::new(), invoice.id, Timestamp::now())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::NotFound { entity: "Invoice", .. }));
    }

    #[tokio::test]
    async fn finalize_rejects_invalid_totals() {
        let store = InMemoryBillingStore::new();
        let now = Timestamp::now();
        let mut invoice = Invoice::draft(
            CompanyId::new(),
            "INV-0101",
            Currency::kes(),
            Party::default(),
            Party::default(),
            now,
        );
        invoice
            .replace_line_items(vec![LineItem::new("Bad", 1, i64::MAX, 1)], now)
            .unwrap();
        InvoiceRepository::insert(&store, &invoice).await.unwrap();

        let err = finalizer(&store)
            .finalize(invoice.company_id, invoice.id, now)
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Validation { .. }));
        let stored = InvoiceRepository::find_by_id(&store, invoice.company_id, invoice.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, InvoiceStatus::Draft);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Snapshot Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn snapshot_ignores_later_edits_to_live_rows() {
        let store = InMemoryBillingStore::new();
        let invoice = draft(&store).await;
        let finalizer = finalizer(&store);
        let sealed = finalizer
            .finalize(invoice.company_id, invoice.id, Timestamp::now())
            .await
            .unwrap();

        let mut tampered = sealed.invoice.clone();
        tampered.line_items = vec![LineItem::new("Rewritten", 10, 99_999, 0)];
        tampered.buyer.name = "Someone Else".to_string();
        store.overwrite_invoice(tampered).await;

        let snapshot = finalizer
            .snapshot(invoice.company_id, invoice.id)
            .await
            .unwrap();

        assert_eq!(snapshot, sealed.snapshot);
        assert_eq!(snapshot.buyer.name, "Wanjiku Traders");
        assert!(snapshot.verify_integrity());
    }

    #[tokio::test]
    async fn altered_snapshot_is_not_served() {
        let store = InMemoryBillingStore::new();
        let invoice = draft(&store).await;
        let finalizer = finalizer(&store);
        let sealed = finalizer
            .finalize(invoice.company_id, invoice.id, Timestamp::now())
            .await
            .unwrap();

        let mut altered = sealed.snapshot.clone();
        altered.buyer.name = "Someone Else".to_string();
        store.overwrite_snapshot(altered).await;

        let err = finalizer
            .snapshot(invoice.company_id, invoice.id)
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Infrastructure(_)));
    }

    #[tokio::test]
    async fn snapshot_of_draft_is_rejected() {
        let store = InMemoryBillingStore::new();
        let invoice = draft(&store).await;

        let err = finalizer(&store)
            .snapshot(invoice.company_id, invoice.id)
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Precondition(_)));
    }

    #[tokio::test]
    async fn line_items_cannot_change_after_finalization() {
        let store = InMemoryBillingStore::new();
        let invoice = draft(&store).await;
        let mut sealed = finalizer(&store)
            .finalize(invoice.company_id, invoice.id, Timestamp::now())
            .await
            .unwrap()
            .invoice;

        let err = sealed
            .replace_line_items(vec![LineItem::new("Extra", 1, 100, 0)], Timestamp::now())
            .unwrap_err();

        assert!(matches!(err, BillingError::Precondition(_)));
        assert!(InvoiceRepository::update_draft(&store, &sealed).await.is_err());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Compliance Reference Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn compliance_reference_is_status_only() {
        let store = InMemoryBillingStore::new();
        let invoice = draft(&store).await;
        let finalizer = finalizer(&store);
        let sealed = finalizer
            .finalize(invoice.company_id, invoice.id, Timestamp::now())
            .await
            .unwrap();

        let updated = finalizer
            .record_compliance_reference(invoice.company_id, invoice.id, "KRA-0001", Timestamp::now())
            .await
            .unwrap();
        let again = finalizer
            .record_compliance_reference(invoice.company_id, invoice.id, "KRA-0001", Timestamp::now())
            .await
            .unwrap();

        assert_eq!(updated.compliance_reference.as_deref(), Some("KRA-0001"));
        assert_eq!(again.compliance_reference.as_deref(), Some("KRA-0001"));
        let snapshot = finalizer
            .snapshot(invoice.company_id, invoice.id)
            .await
            .unwrap();
        assert_eq!(snapshot, sealed.snapshot);
        let recorded = store
            .audit_actions()
            .await
            .into_iter()
            .filter(|a| a == "invoice.compliance_recorded")
            .count();
        assert_eq!(recorded, 1);
    }

    #[tokio::test]
    async fn compliance_reference_requires_finalization() {
        let store = InMemoryBillingStore::new();
        let invoice = draft(&store).await;

        let err = finalizer(&store)
            .record_compliance_reference(invoice.company_id, invoice.id, "KRA-0001", Timestamp::now())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Precondition(_)));
    }

    #[tokio::test]
    async fn different_compliance_reference_is_rejected() {
        let store = InMemoryBillingStore::new();
        let invoice = draft(&store).await;
        let finalizer = finalizer(&store);
        finalizer
            .finalize(invoice.company_id, invoice.id, Timestamp::now())
            .await
            .unwrap();
        finalizer
            .record_compliance_reference(invoice.company_id, invoice.id, "KRA-0001", Timestamp::now())
            .await
            .unwrap();

        let err = finalizer
            .record_compliance_reference(invoice.company_id, invoice.id, "KRA-0002", Timestamp::now())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Precondition(_)));
    }
}
