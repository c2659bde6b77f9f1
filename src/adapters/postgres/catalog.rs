//! PostgreSQL readers for plans and subscriber profiles.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::{CountryCode, PlanLimits, SubscriptionPlan};
use crate::domain::foundation::{
    CompanyId, Currency, DomainError, ErrorCode, Money, PlanId, UserId,
};
use crate::ports::{PlanCatalog, SubscriberDirectory, SubscriberProfile};

use super::common::{db_error, parse_column};

pub struct PostgresPlanCatalog {
    pool: PgPool,
}

impl PostgresPlanCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: Uuid,
    code: String,
    name: String,
    price_minor: i64,
    currency: String,
    billing_period: String,
    invoices_per_month: Option<i32>,
    users_limit: Option<i32>,
    customers_limit: Option<i32>,
}

fn limit(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

impl TryFrom<PlanRow> for SubscriptionPlan {
    type Error = DomainError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        let currency = Currency::new(row.currency.trim()).map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Invalid currency: {}", e))
        })?;
        Ok(SubscriptionPlan {
            id: PlanId::from_uuid(row.id),
            code: row.code,
            name: row.name,
            price: Money::new(row.price_minor, currency),
            billing_period: parse_column("billing_period", &row.billing_period)?,
            limits: PlanLimits {
                invoices_per_month: limit(row.invoices_per_month),
                users: limit(row.users_limit),
                customers: limit(row.customers_limit),
            },
        })
    }
}

const PLAN_COLUMNS: &str = "id, code, name, price_minor, currency, billing_period, \
     invoices_per_month, users_limit, customers_limit";

#[async_trait]
impl PlanCatalog for PostgresPlanCatalog {
    async fn find_by_id(&self, id: PlanId) -> Result<Option<SubscriptionPlan>, DomainError> {
        let sql = format!("SELECT {} FROM plans WHERE id = $1", PLAN_COLUMNS);
        let row: Option<PlanRow> = sqlx::query_as(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to find plan", e))?;
        row.map(SubscriptionPlan::try_from).transpose()
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<SubscriptionPlan>, DomainError> {
        let sql = format!("SELECT {} FROM plans WHERE code = $1", PLAN_COLUMNS);
        let row: Option<PlanRow> = sqlx::query_as(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to find plan", e))?;
        row.map(SubscriptionPlan::try_from).transpose()
    }
}

pub struct PostgresSubscriberDirectory {
    pool: PgPool,
}

impl PostgresSubscriberDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriberRow {
    company_id: Uuid,
    user_id: Uuid,
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    country: String,
}

#[async_trait]
impl SubscriberDirectory for PostgresSubscriberDirectory {
    async fn find_subscriber(
        &self,
        company_id: CompanyId,
        user_id: UserId,
    ) -> Result<Option<SubscriberProfile>, DomainError> {
        let row: Option<SubscriberRow> = sqlx::query_as(
            r#"
            SELECT company_id, user_id, name, email, phone, country
            FROM billing_subscribers
            WHERE company_id = $1 AND user_id = $2
            "#,
        )
        .bind(company_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find subscriber", e))?;

        row.map(|row| {
            let country = CountryCode::new(row.country.trim()).map_err(|e| {
                DomainError::new(ErrorCode::DatabaseError, format!("Invalid country: {}", e))
            })?;
            Ok(SubscriberProfile {
                company_id: CompanyId::from_uuid(row.company_id),
                user_id: UserId::from_uuid(row.user_id),
                name: row.name,
                email: row.email,
                phone: row.phone,
                country,
            })
        })
        .transpose()
    }
}
