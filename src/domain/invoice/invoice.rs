//! Invoice aggregate.
//!
//! An invoice is mutable while DRAFT. Finalization seals it: line items,
//! discount and parties are frozen, and only status-only fields (paid status,
//! compliance reference) may change afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::billing::BillingError;
use crate::domain::foundation::{CompanyId, Currency, InvoiceId, Money, StateMachine, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Finalized,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Finalized => "finalized",
            InvoiceStatus::Paid => "paid",
        }
    }
}

impl StateMachine for InvoiceStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use InvoiceStatus::*;
        matches!((self, target), (Draft, Finalized) | (Finalized, Paid))
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use InvoiceStatus::*;
        match self {
            Draft => vec![Finalized],
            Finalized => vec![Paid],
            Paid => vec![],
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "finalized" => Ok(InvoiceStatus::Finalized),
            "paid" => Ok(InvoiceStatus::Paid),
            other => Err(format!("unknown invoice status '{}'", other)),
        }
    }
}

/// Seller or buyer identity as printed on the invoice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub tax_id: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

/// One invoice line. Tax is computed upstream and arrives as an amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price_minor: i64,
    pub tax_minor: i64,
}

impl LineItem {
    pub fn new(
        description: impl Into<String>,
        quantity: u32,
        unit_price_minor: i64,
        tax_minor: i64,
    ) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price_minor,
            tax_minor,
        }
    }
}

/// Computed totals. `grand_total = subtotal + tax - discount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: Money,
    pub tax: Money,
    pub discount: Money,
    pub grand_total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub company_id: CompanyId,
    pub number: String,
    pub status: InvoiceStatus,
    pub currency: Currency,
    pub seller: Party,
    pub buyer: Party,
    pub line_items: Vec<LineItem>,
    pub discount_minor: i64,
    pub finalized_at: Option<Timestamp>,
    pub paid_at: Option<Timestamp>,

    /// External tax-authority submission id. Status-only.
    pub compliance_reference: Option<String>,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Invoice {
    pub fn draft(
        company_id: CompanyId,
        number: impl Into<String>,
        currency: Currency,
        seller: Party,
        buyer: Party,
        now: Timestamp,
    ) -> Self {
        Self {
            id: InvoiceId::new(),
            company_id,
            number: number.into(),
            status: InvoiceStatus::Draft,
            currency,
            seller,
            buyer,
            line_items: Vec::new(),
            discount_minor: 0,
            finalized_at: None,
            paid_at: None,
            compliance_reference: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.status == InvoiceStatus::Draft
    }

    /// Replaces every line item. Rejected once the invoice is sealed.
    pub fn replace_line_items(
        &mut self,
        items: Vec<LineItem>,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        self.ensure_draft("edit line items of")?;
        for item in &items {
            if item.description.trim().is_empty() {
                return Err(BillingError::validation("description", "cannot be empty"));
            }
            if item.quantity == 0 {
                return Err(BillingError::validation("quantity", "must be at least 1"));
            }
            if item.unit_price_minor < 0 || item.tax_minor < 0 {
                return Err(BillingError::validation("amount", "cannot be negative"));
            }
        }
        self.line_items = items;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_discount(&mut self, discount_minor: i64, now: Timestamp) -> Result<(), BillingError> {
        self.ensure_draft("change the discount of")?;
        if discount_minor < 0 {
            return Err(BillingError::validation("discount", "cannot be negative"));
        }
        self.discount_minor = discount_minor;
        self.updated_at = now;
        Ok(())
    }

    /// Totals over the live rows.
    pub fn totals(&self) -> Result<InvoiceTotals, BillingError> {
        let zero = Money::zero(self.currency.clone());
        let mut subtotal = zero.clone();
        let mut tax = zero;
        for item in &self.line_items {
            let line = Money::new(item.unit_price_minor, self.currency.clone())
                .checked_mul(i64::from(item.quantity))?;
            subtotal = subtotal.checked_add(&line)?;
            tax = tax.checked_add(&Money::new(item.tax_minor, self.currency.clone()))?;
        }
        let discount = Money::new(self.discount_minor, self.currency.clone());
        let grand_total = subtotal.checked_add(&tax)?.checked_sub(&discount)?;
        Ok(InvoiceTotals {
            subtotal,
            tax,
            discount,
            grand_total,
        })
    }

    /// DRAFT to FINALIZED. Callers persist this together with the snapshot.
    pub fn finalize(&mut self, now: Timestamp) -> Result<(), BillingError> {
        self.status = self.status.transition_to(InvoiceStatus::Finalized).map_err(|_| {
            BillingError::precondition(format!(
                "Invoice {} is {}; only draft invoices can be finalized",
                self.number, self.status
            ))
        })?;
        self.finalized_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// FINALIZED to PAID.
    pub fn mark_paid(&mut self, now: Timestamp) -> Result<(), BillingError> {
        self.status = self.status.transition_to(InvoiceStatus::Paid).map_err(|_| {
            BillingError::precondition(format!(
                "Invoice {} is {}; only finalized invoices can be marked paid",
                self.number, self.status
            ))
        })?;
        self.paid_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Stores the tax-authority submission id. Sealed invoices only; a
    /// different reference cannot overwrite an existing one.
    pub fn record_compliance_reference(
        &mut self,
        reference: impl Into<String>,
        now: Timestamp,
    ) -> Result<(), BillingError> {
        if self.is_draft() {
            return Err(BillingError::precondition(format!(
                "Invoice {} must be finalized before compliance submission",
                self.number
            )));
        }
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(BillingError::validation("compliance_reference", "cannot be empty"));
        }
        match &self.compliance_reference {
            Some(existing) if *existing == reference => Ok(()),
            Some(existing) => Err(BillingError::precondition(format!(
                "Invoice {} already has compliance reference {}",
                self.number, existing
            ))),
            None => {
                self.compliance_reference = Some(reference);
                self.updated_at = now;
                Ok(())
            }
        }
    }

    fn ensure_draft(&self, action: &str) -> Result<(), BillingError> {
        if self.is_draft() {
            Ok(())
        } else {
            Err(BillingError::precondition(format!(
                "Cannot {} invoice {} in {} state",
                action, self.number, self.status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> Invoice {
        let mut invoice = Invoice::draft(
            CompanyId::new(),
            "INV-0001",
            Currency::kes(),
            Party {
                name: "Acme Ltd".to_string(),
                ..Default::default()
            },
            Party {
                name: "Buyer Co".to_string(),
                ..Default::default()
            },
            Timestamp::now(),
        );
        invoice
            .replace_line_items(
                vec![
                    LineItem::new("Consulting", 2, 4_000, 1_280),
                    LineItem::new("Hosting", 1, 2_000, 320),
                ],
                Timestamp::now(),
            )
            .unwrap();
        invoice
    }

    #[test]
    fn totals_sum_lines_tax_and_discount() {
        let mut invoice = draft();
        invoice.set_discount(500, Timestamp::now()).unwrap();
        let totals = invoice.totals().unwrap();
        assert_eq!(totals.subtotal.amount_minor(), 10_000);
        assert_eq!(totals.tax.amount_minor(), 1_600);
        assert_eq!(totals.discount.amount_minor(), 500);
        assert_eq!(totals.grand_total.amount_minor(), 11_100);
    }

    #[test]
    fn finalize_twice_is_precondition_error() {
        let mut invoice = draft();
        invoice.finalize(Timestamp::now()).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Finalized);
        assert!(matches!(
            invoice.finalize(Timestamp::now()),
            Err(BillingError::Precondition(_))
        ));
    }

    #[test]
    fn sealed_invoice_rejects_edits() {
        let mut invoice = draft();
        invoice.finalize(Timestamp::now()).unwrap();
        let items = invoice.line_items.clone();
        assert!(invoice
            .replace_line_items(vec![LineItem::new("Other", 1, 1, 0)], Timestamp::now())
            .is_err());
        assert!(invoice.set_discount(100, Timestamp::now()).is_err());
        assert_eq!(invoice.line_items, items);
    }

    #[test]
    fn line_item_validation() {
        let mut invoice = draft();
        assert!(invoice
            .replace_line_items(vec![LineItem::new(" ", 1, 1, 0)], Timestamp::now())
            .is_err());
        assert!(invoice
            .replace_line_items(vec![LineItem::new("x", 0, 1, 0)], Timestamp::now())
            .is_err());
        assert!(invoice
            .replace_line_items(vec![LineItem::new("x", 1, -1, 0)], Timestamp::now())
            .is_err());
    }

    #[test]
    fn mark_paid_requires_finalized() {
        let mut invoice = draft();
        assert!(invoice.mark_paid(Timestamp::now()).is_err());
        invoice.finalize(Timestamp::now()).unwrap();
        invoice.mark_paid(Timestamp::now()).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert!(invoice.paid_at.is_some());
    }

    #[test]
    fn compliance_reference_after_finalization_only() {
        let mut invoice = draft();
        assert!(invoice
            .record_compliance_reference("KRA-1", Timestamp::now())
            .is_err());
        invoice.finalize(Timestamp::now()).unwrap();
        invoice
            .record_compliance_reference("KRA-1", Timestamp::now())
            .unwrap();
        invoice
            .record_compliance_reference("KRA-1", Timestamp::now())
            .unwrap();
        assert!(invoice
            .record_compliance_reference("KRA-2", Timestamp::now())
            .is_err());
    }
}
