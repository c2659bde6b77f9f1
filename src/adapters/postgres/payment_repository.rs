//! PostgreSQL implementation of PaymentRepository and LedgerTransaction.
//!
//! A ledger transaction wraps one sqlx transaction. Row reads take
//! `FOR UPDATE` locks so concurrent callbacks for the same payment serialize;
//! the `payments_idempotency_key_key` constraint backs the idempotency rule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::billing::PaymentGateway;
use crate::domain::foundation::{
    AuditEntry, CompanyId, Currency, DomainError, ErrorCode, InvoiceId, Money, PaymentId,
    Timestamp,
};
use crate::domain::invoice::{Invoice, InvoiceSnapshot};
use crate::domain::payment::{Payable, Payment};
use crate::ports::{LedgerTransaction, PaymentRepository};

use super::common::{db_error, insert_audit, opt_dt, opt_ts, parse_column, ts, unique_violation};
use super::invoice_repository::{InvoiceRow, SnapshotRow, INVOICE_COLUMNS};

const PAYMENT_COLUMNS: &str = "id, company_id, payable_type, payable_id, amount_minor, currency, \
     gateway, status, gateway_transaction_id, idempotency_key, gateway_metadata, paid_at, \
     failure_reason, created_at, updated_at";

pub struct PostgresPaymentRepository {
    pool: PgPool,
}

impl PostgresPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a payment.
#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    company_id: Uuid,
    payable_type: String,
    payable_id: Uuid,
    amount_minor: i64,
    currency: String,
    gateway: String,
    status: String,
    gateway_transaction_id: Option<String>,
    idempotency_key: String,
    gateway_metadata: Json<JsonValue>,
    paid_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DomainError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let payable = Payable::from_parts(&row.payable_type, row.payable_id)
            .map_err(|e| DomainError::new(ErrorCode::DatabaseError, e))?;
        let currency = Currency::new(row.currency.trim()).map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Invalid currency: {}", e))
        })?;
        Ok(Payment {
            id: PaymentId::from_uuid(row.id),
            company_id: CompanyId::from_uuid(row.company_id),
            payable,
            amount: Money::new(row.amount_minor, currency),
            gateway: parse_column("gateway", &row.gateway)?,
            status: parse_column("status", &row.status)?,
            gateway_transaction_id: row.gateway_transaction_id,
            idempotency_key: row.idempotency_key,
            gateway_metadata: row.gateway_metadata.0,
            paid_at: opt_ts(row.paid_at),
            failure_reason: row.failure_reason,
            created_at: ts(row.created_at),
            updated_at: ts(row.updated_at),
        })
    }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, DomainError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin ledger transaction", e))?;
        Ok(Box::new(PostgresLedgerTransaction { tx }))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>, DomainError> {
        let sql = format!("SELECT {} FROM payments WHERE idempotency_key = $1", PAYMENT_COLUMNS);
        let row: Option<PaymentRow> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to find payment", e))?;
        row.map(Payment::try_from).transpose()
    }

    async fn find_stale_initiated(&self, cutoff: Timestamp) -> Result<Vec<Payment>, DomainError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE status = 'initiated' AND created_at < $1 ORDER BY created_at",
            PAYMENT_COLUMNS
        );
        let rows: Vec<PaymentRow> = sqlx::query_as(&sql)
            .bind(cutoff.as_datetime())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to find stale payments", e))?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn list_for_payable(
        &self,
        company_id: CompanyId,
        payable: Payable,
    ) -> Result<Vec<Payment>, DomainError> {
        let sql = format!(
            "SELECT {} FROM payments \
             WHERE company_id = $1 AND payable_type = $2 AND payable_id = $3 \
             ORDER BY created_at",
            PAYMENT_COLUMNS
        );
        let rows: Vec<PaymentRow> = sqlx::query_as(&sql)
            .bind(company_id.as_uuid())
            .bind(payable.payable_type())
            .bind(payable.payable_id())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list payments", e))?;
        rows.into_iter().map(Payment::try_from).collect()
    }
}

/// One ledger unit over a PostgreSQL transaction.
///
/// Dropping without commit rolls back (sqlx semantics).
pub struct PostgresLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PostgresLedgerTransaction {
    async fn payment_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> Result<Option<Payment>, DomainError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE idempotency_key = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        );
        let row: Option<PaymentRow> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to lock payment", e))?;
        row.map(Payment::try_from).transpose()
    }

    async fn payment_by_gateway_transaction_id(
        &mut self,
        gateway: PaymentGateway,
        transaction_id: &str,
    ) -> Result<Option<Payment>, DomainError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE gateway = $1 AND gateway_transaction_id = $2 FOR UPDATE",
            PAYMENT_COLUMNS
        );
        let row: Option<PaymentRow> = sqlx::query_as(&sql)
            .bind(gateway.as_str())
            .bind(transaction_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to lock payment", e))?;
        row.map(Payment::try_from).transpose()
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, company_id, payable_type, payable_id, amount_minor, currency, gateway,
                status, gateway_transaction_id, idempotency_key, gateway_metadata, paid_at,
                failure_reason, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.company_id.as_uuid())
        .bind(payment.payable.payable_type())
        .bind(payment.payable.payable_id())
        .bind(payment.amount.amount_minor())
        .bind(payment.amount.currency().as_str())
        .bind(payment.gateway.as_str())
        .bind(payment.status.as_str())
        .bind(&payment.gateway_transaction_id)
        .bind(&payment.idempotency_key)
        .bind(Json(&payment.gateway_metadata))
        .bind(opt_dt(&payment.paid_at))
        .bind(&payment.failure_reason)
        .bind(payment.created_at.as_datetime())
        .bind(payment.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            unique_violation(
                e,
                "payments_idempotency_key_key",
                ErrorCode::DuplicateIdempotencyKey,
                "Idempotency key already used",
                "Failed to insert payment",
            )
        })?;
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                status = $2,
                gateway_transaction_id = $3,
                gateway_metadata = $4,
                paid_at = $5,
                failure_reason = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.status.as_str())
        .bind(&payment.gateway_transaction_id)
        .bind(Json(&payment.gateway_metadata))
        .bind(opt_dt(&payment.paid_at))
        .bind(&payment.failure_reason)
        .bind(payment.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to update payment", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::PaymentNotFound,
                format!("Payment {} not found", payment.id),
            ));
        }
        Ok(())
    }

    async fn successful_total_for_invoice(
        &mut self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<i64, DomainError> {
        sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount_minor), 0)::BIGINT
            FROM payments
            WHERE company_id = $1
              AND payable_type = 'invoice'
              AND payable_id = $2
              AND status = 'success'
            "#,
        )
        .bind(company_id.as_uuid())
        .bind(invoice_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to total invoice payments", e))
    }

    async fn invoice_for_update(
        &mut self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<Option<Invoice>, DomainError> {
        let sql = format!(
            "SELECT {} FROM invoices WHERE id = $1 AND company_id = $2 FOR UPDATE",
            INVOICE_COLUMNS
        );
        let row: Option<InvoiceRow> = sqlx::query_as(&sql)
            .bind(invoice_id.as_uuid())
            .bind(company_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to lock invoice", e))?;
        row.map(Invoice::try_from).transpose()
    }

    async fn invoice_snapshot(
        &mut self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<Option<InvoiceSnapshot>, DomainError> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            "SELECT payload FROM invoice_snapshots WHERE invoice_id = $1 AND company_id = $2",
        )
        .bind(invoice_id.as_uuid())
        .bind(company_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to load invoice snapshot", e))?;
        Ok(row.map(|r| r.payload.0))
    }

    async fn mark_invoice_paid(
        &mut self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
        paid_at: Timestamp,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE invoices SET status = 'paid', paid_at = $3, updated_at = $3
            WHERE id = $1 AND company_id = $2 AND status = 'finalized'
            "#,
        )
        .bind(invoice_id.as_uuid())
        .bind(company_id.as_uuid())
        .bind(paid_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to mark invoice paid", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("Invoice {} is not awaiting payment", invoice_id),
            ));
        }
        Ok(())
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<(), DomainError> {
        insert_audit(&mut *self.tx, entry).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_error("Failed to commit ledger transaction", e))
    }
}
