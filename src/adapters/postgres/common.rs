//! Shared helpers for the PostgreSQL adapters.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::types::Json;

use crate::domain::foundation::{AuditEntry, DomainError, ErrorCode, Timestamp};

/// Wraps a sqlx error as `DatabaseError` with context.
pub(crate) fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("{}: {}", context, e))
}

/// Maps a unique-constraint violation on `constraint` to `code`, anything
/// else to `DatabaseError`.
pub(crate) fn unique_violation(
    e: sqlx::Error,
    constraint: &str,
    code: ErrorCode,
    message: &str,
    context: &str,
) -> DomainError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.constraint() == Some(constraint) {
            return DomainError::new(code, message);
        }
    }
    db_error(context, e)
}

/// Parses a stored enum column.
pub(crate) fn parse_column<T>(column: &str, value: &str) -> Result<T, DomainError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e: T::Err| {
        DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid {} value '{}': {}", column, value, e),
        )
    })
}

pub(crate) fn ts(value: DateTime<Utc>) -> Timestamp {
    Timestamp::from_datetime(value)
}

pub(crate) fn opt_ts(value: Option<DateTime<Utc>>) -> Option<Timestamp> {
    value.map(Timestamp::from_datetime)
}

pub(crate) fn opt_dt(value: &Option<Timestamp>) -> Option<DateTime<Utc>> {
    value.as_ref().map(|t| *t.as_datetime())
}

/// Appends an audit entry using whichever executor the caller holds.
pub(crate) async fn insert_audit<'e, E>(executor: E, entry: &AuditEntry) -> Result<(), DomainError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO audit_entries (
            actor, action, entity_type, entity_id, company_id, metadata, occurred_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&entry.actor)
    .bind(&entry.action)
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(entry.company_id.as_uuid())
    .bind(Json(&entry.metadata))
    .bind(entry.occurred_at.as_datetime())
    .execute(executor)
    .await
    .map_err(|e| db_error("Failed to append audit entry", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::SubscriptionStatus;

    #[test]
    fn parse_column_reports_bad_values() {
        let ok: SubscriptionStatus = parse_column("status", "grace").unwrap();
        assert_eq!(ok, SubscriptionStatus::Grace);

        let err = parse_column::<SubscriptionStatus>("status", "past_due").unwrap_err();
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(err.message.contains("past_due"));
    }
}
