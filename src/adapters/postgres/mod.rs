//! PostgreSQL adapters - Database implementations for repository ports.
//!
//! This module provides adapters for PostgreSQL-backed persistence:
//! - `PostgresSubscriptionRepository` - Subscriptions, versioned, with audit
//! - `PostgresPaymentRepository` - Ledger transactions with row locks
//! - `PostgresInvoiceRepository` - Invoices and finalization snapshots
//! - `PostgresPlanCatalog` / `PostgresSubscriberDirectory` - Read-only lookups
//!
//! Schema lives in `migrations/`; run it with [`run_migrations`].

mod catalog;
mod common;
mod invoice_repository;
mod payment_repository;
mod subscription_repository;

pub use catalog::{PostgresPlanCatalog, PostgresSubscriberDirectory};
pub use invoice_repository::PostgresInvoiceRepository;
pub use payment_repository::{PostgresLedgerTransaction, PostgresPaymentRepository};
pub use subscription_repository::PostgresSubscriptionRepository;

use sqlx::PgPool;

/// Applies the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
