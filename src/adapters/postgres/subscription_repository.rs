//! PostgreSQL implementation of SubscriptionRepository.
//!
//! The one-open-subscription rule is the partial unique index
//! `subscriptions_one_open_per_company`; optimistic versioning is a
//! `WHERE version = $n` guard on every update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::billing::{AppliedPayment, Subscription};
use crate::domain::foundation::{
    AuditEntry, CompanyId, DomainError, ErrorCode, PaymentId, PlanId, SubscriptionId, Timestamp,
    UserId,
};
use crate::ports::SubscriptionRepository;

use super::common::{db_error, insert_audit, opt_dt, opt_ts, parse_column, ts, unique_violation};

const ONE_OPEN_CONSTRAINT: &str = "subscriptions_one_open_per_company";

const SELECT_COLUMNS: &str = r#"
    SELECT id, company_id, user_id, plan_id, plan_code, status, gateway, starts_at, ends_at,
           next_billing_at, auto_renew, gateway_subscription_id, cancelled_at,
           cancellation_reason, reminder_sent_for, last_payment_id, last_payment_at, created_at,
           updated_at, version
    FROM subscriptions
"#;

pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_many(
        &self,
        where_clause: &str,
        now: Option<Timestamp>,
        until: Option<Timestamp>,
    ) -> Result<Vec<Subscription>, DomainError> {
        let sql = format!("{} WHERE {} ORDER BY created_at ASC", SELECT_COLUMNS, where_clause);
        let mut query = sqlx::query_as::<_, SubscriptionRow>(&sql);
        if let Some(now) = now {
            query = query.bind(*now.as_datetime());
        }
        if let Some(until) = until {
            query = query.bind(*until.as_datetime());
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to query subscriptions", e))?;
        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn insert_in(
        tx: &mut Transaction<'_, Postgres>,
        subscription: &Subscription,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, company_id, user_id, plan_id, plan_code, status, gateway, starts_at,
                ends_at, next_billing_at, auto_renew, gateway_subscription_id, cancelled_at,
                cancellation_reason, reminder_sent_for, last_payment_id, last_payment_at,
                created_at, updated_at, version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                      $18, $19, $20)
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.company_id.as_uuid())
        .bind(subscription.user_id.as_uuid())
        .bind(subscription.plan_id.as_uuid())
        .bind(&subscription.plan_code)
        .bind(subscription.status.as_str())
        .bind(subscription.gateway.as_str())
        .bind(opt_dt(&subscription.starts_at))
        .bind(opt_dt(&subscription.ends_at))
        .bind(opt_dt(&subscription.next_billing_at))
        .bind(subscription.auto_renew)
        .bind(&subscription.gateway_subscription_id)
        .bind(opt_dt(&subscription.cancelled_at))
        .bind(&subscription.cancellation_reason)
        .bind(opt_dt(&subscription.reminder_sent_for))
        .bind(subscription.last_payment.map(|p| *p.payment_id.as_uuid()))
        .bind(subscription.last_payment.map(|p| *p.initiated_at.as_datetime()))
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .bind(subscription.version)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            unique_violation(
                e,
                ONE_OPEN_CONSTRAINT,
                ErrorCode::ActiveSubscriptionExists,
                "Company already has an open subscription",
                "Failed to insert subscription",
            )
        })?;
        Ok(())
    }

    /// Version-guarded update. Returns the stored row.
    async fn update_in(
        tx: &mut Transaction<'_, Postgres>,
        subscription: &Subscription,
    ) -> Result<Subscription, DomainError> {
        let sql = format!(
            r#"
            UPDATE subscriptions SET
                status = $3,
                gateway = $4,
                starts_at = $5,
                ends_at = $6,
                next_billing_at = $7,
                auto_renew = $8,
                gateway_subscription_id = $9,
                cancelled_at = $10,
                cancellation_reason = $11,
                reminder_sent_for = $12,
                last_payment_id = $13,
                last_payment_at = $14,
                updated_at = $15,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            "id, company_id, user_id, plan_id, plan_code, status, gateway, starts_at, ends_at, \
             next_billing_at, auto_renew, gateway_subscription_id, cancelled_at, \
             cancellation_reason, reminder_sent_for, last_payment_id, last_payment_at, \
             created_at, updated_at, version"
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(subscription.id.as_uuid())
            .bind(subscription.version)
            .bind(subscription.status.as_str())
            .bind(subscription.gateway.as_str())
            .bind(opt_dt(&subscription.starts_at))
            .bind(opt_dt(&subscription.ends_at))
            .bind(opt_dt(&subscription.next_billing_at))
            .bind(subscription.auto_renew)
            .bind(&subscription.gateway_subscription_id)
            .bind(opt_dt(&subscription.cancelled_at))
            .bind(&subscription.cancellation_reason)
            .bind(opt_dt(&subscription.reminder_sent_for))
            .bind(subscription.last_payment.map(|p| *p.payment_id.as_uuid()))
            .bind(subscription.last_payment.map(|p| *p.initiated_at.as_datetime()))
            .bind(subscription.updated_at.as_datetime())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| {
                unique_violation(
                    e,
                    ONE_OPEN_CONSTRAINT,
                    ErrorCode::ActiveSubscriptionExists,
                    "Company already has an open subscription",
                    "Failed to update subscription",
                )
            })?;

        match row {
            Some(row) => Subscription::try_from(row),
            None => {
                let exists: Option<i64> =
                    sqlx::query_scalar("SELECT version FROM subscriptions WHERE id = $1")
                        .bind(subscription.id.as_uuid())
                        .fetch_optional(&mut **tx)
                        .await
                        .map_err(|e| db_error("Failed to check subscription", e))?;
                Err(match exists {
                    Some(stored) => DomainError::new(
                        ErrorCode::ConcurrentModification,
                        format!(
                            "Subscription {} is at version {}, not {}",
                            subscription.id, stored, subscription.version
                        ),
                    ),
                    None => DomainError::new(
                        ErrorCode::SubscriptionNotFound,
                        format!("Subscription {} not found", subscription.id),
                    ),
                })
            }
        }
    }
}

/// Database row representation of a subscription.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    company_id: Uuid,
    user_id: Uuid,
    plan_id: Uuid,
    plan_code: String,
    status: String,
    gateway: String,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    next_billing_at: Option<DateTime<Utc>>,
    auto_renew: bool,
    gateway_subscription_id: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    reminder_sent_for: Option<DateTime<Utc>>,
    last_payment_id: Option<Uuid>,
    last_payment_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let last_payment = match (row.last_payment_id, row.last_payment_at) {
            (Some(id), Some(initiated_at)) => Some(AppliedPayment {
                payment_id: PaymentId::from_uuid(id),
                initiated_at: ts(initiated_at),
            }),
            _ => None,
        };
        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            company_id: CompanyId::from_uuid(row.company_id),
            user_id: UserId::from_uuid(row.user_id),
            plan_id: PlanId::from_uuid(row.plan_id),
            plan_code: row.plan_code,
            status: parse_column("status", &row.status)?,
            gateway: parse_column("gateway", &row.gateway)?,
            starts_at: opt_ts(row.starts_at),
            ends_at: opt_ts(row.ends_at),
            next_billing_at: opt_ts(row.next_billing_at),
            auto_renew: row.auto_renew,
            gateway_subscription_id: row.gateway_subscription_id,
            cancelled_at: opt_ts(row.cancelled_at),
            cancellation_reason: row.cancellation_reason,
            reminder_sent_for: opt_ts(row.reminder_sent_for),
            last_payment,
            created_at: ts(row.created_at),
            updated_at: ts(row.updated_at),
            version: row.version,
        })
    }
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn insert(
        &self,
        subscription: &Subscription,
        audit: &AuditEntry,
    ) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;
        Self::insert_in(&mut tx, subscription).await?;
        insert_audit(&mut *tx, audit).await?;
        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit subscription insert", e))
    }

    async fn update(
        &self,
        subscription: &Subscription,
        audit: &AuditEntry,
    ) -> Result<Subscription, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;
        let saved = Self::update_in(&mut tx, subscription).await?;
        insert_audit(&mut *tx, audit).await?;
        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit subscription update", e))?;
        Ok(saved)
    }

    async fn replace(
        &self,
        cancelled: &Subscription,
        successor: &Subscription,
        audit: &[AuditEntry],
    ) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;
        Self::update_in(&mut tx, cancelled).await?;
        Self::insert_in(&mut tx, successor).await?;
        for entry in audit {
            insert_audit(&mut *tx, entry).await?;
        }
        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit subscription migration", e))
    }

    async fn find_by_id(
        &self,
        company_id: CompanyId,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!("{} WHERE id = $1 AND company_id = $2", SELECT_COLUMNS);
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(id.as_uuid())
            .bind(company_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to find subscription", e))?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_by_gateway_subscription_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!("{} WHERE gateway_subscription_id = $1", SELECT_COLUMNS);
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(gateway_subscription_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to find subscription", e))?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_open_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!(
            "{} WHERE company_id = $1 AND status IN ('pending', 'active', 'grace')",
            SELECT_COLUMNS
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(company_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to find open subscription", e))?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_due_for_renewal(&self, now: Timestamp) -> Result<Vec<Subscription>, DomainError> {
        self.fetch_many(
            "status = 'active' AND auto_renew AND next_billing_at <= $1",
            Some(now),
            None,
        )
        .await
    }

    async fn find_in_grace(&self) -> Result<Vec<Subscription>, DomainError> {
        self.fetch_many("status = 'grace'", None, None).await
    }

    async fn find_grace_expired(&self, now: Timestamp) -> Result<Vec<Subscription>, DomainError> {
        self.fetch_many("status = 'grace' AND ends_at <= $1", Some(now), None)
            .await
    }

    async fn find_billing_between(
        &self,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError> {
        self.fetch_many(
            "status = 'active' AND auto_renew AND next_billing_at > $1 AND next_billing_at <= $2",
            Some(now),
            Some(until),
        )
        .await
    }

    async fn find_billable(&self) -> Result<Vec<Subscription>, DomainError> {
        self.fetch_many("status IN ('active', 'grace')", None, None)
            .await
    }
}
