//! PostgreSQL implementation of InvoiceRepository.
//!
//! Finalization is one transaction: a `status = 'draft'` guarded update, the
//! snapshot insert, and the audit entry. The unique `invoice_id` on
//! `invoice_snapshots` makes a second snapshot impossible even if two
//! finalizations race past the status check.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{
    AuditEntry, CompanyId, Currency, DomainError, ErrorCode, InvoiceId,
};
use crate::domain::invoice::{Invoice, InvoiceSnapshot, LineItem, Party};
use crate::ports::InvoiceRepository;

use super::common::{db_error, insert_audit, opt_dt, opt_ts, parse_column, ts, unique_violation};

pub(crate) const INVOICE_COLUMNS: &str = "id, company_id, number, status, currency, seller, \
     buyer, line_items, discount_minor, finalized_at, paid_at, compliance_reference, \
     created_at, updated_at";

pub struct PostgresInvoiceRepository {
    pool: PgPool,
}

impl PostgresInvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of an invoice.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct InvoiceRow {
    id: Uuid,
    company_id: Uuid,
    number: String,
    status: String,
    currency: String,
    seller: Json<Party>,
    buyer: Json<Party>,
    line_items: Json<Vec<LineItem>>,
    discount_minor: i64,
    finalized_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    compliance_reference: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = DomainError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let currency = Currency::new(row.currency.trim()).map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Invalid currency: {}", e))
        })?;
        Ok(Invoice {
            id: InvoiceId::from_uuid(row.id),
            company_id: CompanyId::from_uuid(row.company_id),
            number: row.number,
            status: parse_column("status", &row.status)?,
            currency,
            seller: row.seller.0,
            buyer: row.buyer.0,
            line_items: row.line_items.0,
            discount_minor: row.discount_minor,
            finalized_at: opt_ts(row.finalized_at),
            paid_at: opt_ts(row.paid_at),
            compliance_reference: row.compliance_reference,
            created_at: ts(row.created_at),
            updated_at: ts(row.updated_at),
        })
    }
}

/// Snapshots are stored whole so the content hash survives the round trip.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SnapshotRow {
    pub(crate) payload: Json<InvoiceSnapshot>,
}

#[async_trait]
impl InvoiceRepository for PostgresInvoiceRepository {
    async fn insert(&self, invoice: &Invoice) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, company_id, number, status, currency, seller, buyer, line_items,
                discount_minor, finalized_at, paid_at, compliance_reference, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.company_id.as_uuid())
        .bind(&invoice.number)
        .bind(invoice.status.as_str())
        .bind(invoice.currency.as_str())
        .bind(Json(&invoice.seller))
        .bind(Json(&invoice.buyer))
        .bind(Json(&invoice.line_items))
        .bind(invoice.discount_minor)
        .bind(opt_dt(&invoice.finalized_at))
        .bind(opt_dt(&invoice.paid_at))
        .bind(&invoice.compliance_reference)
        .bind(invoice.created_at.as_datetime())
        .bind(invoice.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert invoice", e))?;
        Ok(())
    }

    async fn update_draft(&self, invoice: &Invoice) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE invoices SET
                seller = $3,
                buyer = $4,
                line_items = $5,
                discount_minor = $6,
                updated_at = $7
            WHERE id = $1 AND company_id = $2 AND status = 'draft'
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.company_id.as_uuid())
        .bind(Json(&invoice.seller))
        .bind(Json(&invoice.buyer))
        .bind(Json(&invoice.line_items))
        .bind(invoice.discount_minor)
        .bind(invoice.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update invoice", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("Invoice {} is not an editable draft", invoice.id),
            ));
        }
        Ok(())
    }

    async fn find_by_id(
        &self,
        company_id: CompanyId,
        id: InvoiceId,
    ) -> Result<Option<Invoice>, DomainError> {
        let sql = format!(
            "SELECT {} FROM invoices WHERE id = $1 AND company_id = $2",
            INVOICE_COLUMNS
        );
        let row: Option<InvoiceRow> = sqlx::query_as(&sql)
            .bind(id.as_uuid())
            .bind(company_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to find invoice", e))?;
        row.map(Invoice::try_from).transpose()
    }

    async fn find_snapshot(
        &self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<Option<InvoiceSnapshot>, DomainError> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            "SELECT payload FROM invoice_snapshots WHERE invoice_id = $1 AND company_id = $2",
        )
        .bind(invoice_id.as_uuid())
        .bind(company_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find invoice snapshot", e))?;
        Ok(row.map(|r| r.payload.0))
    }

    async fn finalize(
        &self,
        invoice: &Invoice,
        snapshot: &InvoiceSnapshot,
        audit: &AuditEntry,
    ) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let result = sqlx::query(
            r#"
            UPDATE invoices SET status = 'finalized', finalized_at = $3, updated_at = $4
            WHERE id = $1 AND company_id = $2 AND status = 'draft'
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.company_id.as_uuid())
        .bind(opt_dt(&invoice.finalized_at))
        .bind(invoice.updated_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to finalize invoice", e))?;

        if result.rows_affected() == 0 {
            let exists: Option<String> = sqlx::query_scalar(
                "SELECT status FROM invoices WHERE id = $1 AND company_id = $2",
            )
            .bind(invoice.id.as_uuid())
            .bind(invoice.company_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to check invoice", e))?;
            return Err(match exists {
                Some(status) => DomainError::new(
                    ErrorCode::InvalidStateTransition,
                    format!("Invoice {} is already {}", invoice.id, status),
                ),
                None => DomainError::new(
                    ErrorCode::InvoiceNotFound,
                    format!("Invoice {} not found", invoice.id),
                ),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO invoice_snapshots (id, invoice_id, company_id, payload, content_hash, captured_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(snapshot.id.as_uuid())
        .bind(snapshot.invoice_id.as_uuid())
        .bind(snapshot.company_id.as_uuid())
        .bind(Json(snapshot))
        .bind(&snapshot.content_hash)
        .bind(snapshot.captured_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            unique_violation(
                e,
                "invoice_snapshots_invoice_id_key",
                ErrorCode::SnapshotExists,
                "Invoice already has a snapshot",
                "Failed to store invoice snapshot",
            )
        })?;

        insert_audit(&mut *tx, audit).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit finalization", e))
    }

    async fn save_compliance_reference(
        &self,
        invoice: &Invoice,
        audit: &AuditEntry,
    ) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let result = sqlx::query(
            r#"
            UPDATE invoices SET compliance_reference = $3, updated_at = $4
            WHERE id = $1 AND company_id = $2
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.company_id.as_uuid())
        .bind(&invoice.compliance_reference)
        .bind(invoice.updated_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to save compliance reference", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::InvoiceNotFound,
                format!("Invoice {} not found", invoice.id),
            ));
        }

        insert_audit(&mut *tx, audit).await?;
        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit compliance reference", e))
    }
}
