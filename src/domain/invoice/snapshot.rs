//! Invoice snapshot.
//!
//! A denormalized, immutable copy of an invoice taken at finalization. Every
//! read of a finalized invoice goes through the snapshot, never the live rows.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::billing::{hex_encode, BillingError};
use crate::domain::foundation::{
    CompanyId, Currency, InvoiceId, Money, SnapshotId, Timestamp,
};

use super::{Invoice, InvoiceTotals, LineItem, Party};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSnapshot {
    pub id: SnapshotId,
    pub invoice_id: InvoiceId,
    pub company_id: CompanyId,
    pub invoice_number: String,
    pub currency: Currency,
    pub seller: Party,
    pub buyer: Party,
    pub line_items: Vec<LineItem>,
    pub totals: InvoiceTotals,
    pub captured_at: Timestamp,

    /// SHA-256 of the canonical content, hex encoded.
    pub content_hash: String,
}

/// Hashed fields, in a fixed order.
#[derive(Serialize)]
struct SnapshotContent<'a> {
    invoice_id: &'a InvoiceId,
    company_id: &'a CompanyId,
    invoice_number: &'a str,
    currency: &'a Currency,
    seller: &'a Party,
    buyer: &'a Party,
    line_items: &'a [LineItem],
    totals: &'a InvoiceTotals,
    captured_at: &'a Timestamp,
}

impl InvoiceSnapshot {
    /// Captures the invoice as it stands. The invoice must still be a draft:
    /// capture happens in the same unit as the status flip.
    pub fn capture(invoice: &Invoice, now: Timestamp) -> Result<Self, BillingError> {
        if !invoice.is_draft() {
            return Err(BillingError::precondition(format!(
                "Invoice {} is {}; snapshots are captured at finalization",
                invoice.number, invoice.status
            )));
        }
        let totals = invoice.totals()?;
        let mut snapshot = Self {
            id: SnapshotId::new(),
            invoice_id: invoice.id,
            company_id: invoice.company_id,
            invoice_number: invoice.number.clone(),
            currency: invoice.currency.clone(),
            seller: invoice.seller.clone(),
            buyer: invoice.buyer.clone(),
            line_items: invoice.line_items.clone(),
            totals,
            captured_at: now,
            content_hash: String::new(),
        };
        snapshot.content_hash = snapshot.compute_hash()?;
        Ok(snapshot)
    }

    pub fn grand_total(&self) -> &Money {
        &self.totals.grand_total
    }

    /// Hash over the current field values.
    pub fn compute_hash(&self) -> Result<String, BillingError> {
        let content = SnapshotContent {
            invoice_id: &self.invoice_id,
            company_id: &self.company_id,
            invoice_number: &self.invoice_number,
            currency: &self.currency,
            seller: &self.seller,
            buyer: &self.buyer,
            line_items: &self.line_items,
            totals: &self.totals,
            captured_at: &self.captured_at,
        };
        let bytes = serde_json::to_vec(&content)
            .map_err(|e| BillingError::infrastructure(format!("snapshot encoding: {}", e)))?;
        Ok(hex_encode(&Sha256::digest(&bytes)))
    }

    /// True when the stored hash still matches the content.
    pub fn verify_integrity(&self) -> bool {
        self.compute_hash()
            .map(|hash| hash == self.content_hash)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice() -> Invoice {
        let mut invoice = Invoice::draft(
            CompanyId::new(),
            "INV-0042",
            Currency::kes(),
            Party {
                name: "Seller".to_string(),
                tax_id: Some("P051234567X".to_string()),
                ..Default::default()
            },
            Party {
                name: "Buyer".to_string(),
                ..Default::default()
            },
            Timestamp::now(),
        );
        invoice
            .replace_line_items(vec![LineItem::new("Subscription", 1, 10_000, 1_600)], Timestamp::now())
            .unwrap();
        invoice
    }

    #[test]
    fn capture_copies_content_and_totals() {
        let invoice = invoice();
        let snapshot = InvoiceSnapshot::capture(&invoice, Timestamp::now()).unwrap();
        assert_eq!(snapshot.invoice_id, invoice.id);
        assert_eq!(snapshot.invoice_number, "INV-0042");
        assert_eq!(snapshot.line_items, invoice.line_items);
        assert_eq!(snapshot.grand_total().amount_minor(), 11_600);
        assert_eq!(snapshot.content_hash.len(), 64);
        assert!(snapshot.verify_integrity());
    }

    #[test]
    fn later_edits_to_live_rows_do_not_reach_snapshot() {
        let mut invoice = invoice();
        let snapshot = InvoiceSnapshot::capture(&invoice, Timestamp::now()).unwrap();
        invoice.line_items[0].unit_price_minor = 99_999;
        invoice.seller.name = "Renamed".to_string();
        assert_eq!(snapshot.line_items[0].unit_price_minor, 10_000);
        assert_eq!(snapshot.seller.name, "Seller");
        assert!(snapshot.verify_integrity());
    }

    #[test]
    fn tampering_breaks_integrity() {
        let mut snapshot = InvoiceSnapshot::capture(&invoice(), Timestamp::now()).unwrap();
        snapshot.totals.grand_total = Money::new(1, Currency::kes());
        assert!(!snapshot.verify_integrity());
    }

    #[test]
    fn capture_rejects_sealed_invoice() {
        let mut invoice = invoice();
        invoice.finalize(Timestamp::now()).unwrap();
        assert!(matches!(
            InvoiceSnapshot::capture(&invoice, Timestamp::now()),
            Err(BillingError::Precondition(_))
        ));
    }

    #[test]
    fn hash_survives_json_round_trip() {
        let snapshot = InvoiceSnapshot::capture(&invoice(), Timestamp::now()).unwrap();
        let json = serde_json::to_value(&snapshot).unwrap();
        let restored: InvoiceSnapshot = serde_json::from_value(json).unwrap();
        assert!(restored.verify_integrity());
        assert_eq!(restored, snapshot);
    }
}
