//! Billing error taxonomy.
//!
//! Every failure the billing core can surface falls into one of these
//! categories. The category decides what the caller does with it:
//!
//! | Error | Handling | HTTP Status |
//! |-------|----------|-------------|
//! | Precondition | rejected, never retried | 409 |
//! | GatewayTransport | retried by the next sweep run | 502 |
//! | UnsupportedOperation | fall back to local-only behavior | 422 |
//! | IdempotencyConflict | absorbed as a no-op success | 200 |
//! | Validation | fails the single item | 400 |
//! | NotFound | | 404 |
//! | InvalidSignature | | 400 |
//! | InvalidPayload | | 400 |
//! | Conflict | retryable for that item only | 409 |
//! | Configuration | fatal at startup | 500 |
//! | Infrastructure | retryable | 500 |

use std::fmt;
use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, TransitionError, ValidationError};

/// Errors raised by billing operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    /// Entity is in the wrong state for the requested operation.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Network, authentication or provider failure calling a gateway.
    #[error("Gateway {gateway} unavailable: {message}")]
    GatewayTransport { gateway: String, message: String },

    /// The gateway has no concept of the requested operation.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Duplicate delivery for a payment that is already terminal.
    #[error("Payment with idempotency key '{key}' is already terminal")]
    IdempotencyConflict { key: String },

    /// Missing or malformed input such as a phone number or credentials.
    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Callback signature did not verify.
    #[error("Invalid callback signature: {0}")]
    InvalidSignature(String),

    /// Callback body is missing required fields or names an unsupported event.
    #[error("Invalid callback payload: {0}")]
    InvalidPayload(String),

    /// Optimistic lock or uniqueness violation.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl BillingError {
    pub fn precondition(message: impl Into<String>) -> Self {
        BillingError::Precondition(message.into())
    }

    pub fn gateway_transport(gateway: impl fmt::Display, message: impl Into<String>) -> Self {
        BillingError::GatewayTransport {
            gateway: gateway.to_string(),
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        BillingError::UnsupportedOperation(message.into())
    }

    pub fn idempotency_conflict(key: impl Into<String>) -> Self {
        BillingError::IdempotencyConflict { key: key.into() }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        BillingError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BillingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_signature(message: impl Into<String>) -> Self {
        BillingError::InvalidSignature(message.into())
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        BillingError::InvalidPayload(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        BillingError::Conflict(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        BillingError::Configuration(message.into())
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        BillingError::Infrastructure(message.into())
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Precondition(_) => "PRECONDITION_FAILED",
            BillingError::GatewayTransport { .. } => "GATEWAY_TRANSPORT",
            BillingError::UnsupportedOperation(_) => "UNSUPPORTED_OPERATION",
            BillingError::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            BillingError::Validation { .. } => "VALIDATION_FAILED",
            BillingError::NotFound { .. } => "NOT_FOUND",
            BillingError::InvalidSignature(_) => "INVALID_SIGNATURE",
            BillingError::InvalidPayload(_) => "INVALID_PAYLOAD",
            BillingError::Conflict(_) => "CONFLICT",
            BillingError::Configuration(_) => "CONFIGURATION",
            BillingError::Infrastructure(_) => "INFRASTRUCTURE",
        }
    }

    /// Returns true if a later attempt may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::GatewayTransport { .. }
                | BillingError::Conflict(_)
                | BillingError::Infrastructure(_)
        )
    }

    /// Returns true for failures that route a renewal attempt to GRACE.
    pub fn is_renewal_failure(&self) -> bool {
        matches!(
            self,
            BillingError::GatewayTransport { .. } | BillingError::Validation { .. }
        )
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::SubscriptionNotFound => BillingError::NotFound {
                entity: "Subscription",
                id: err.message,
            },
            ErrorCode::PaymentNotFound => BillingError::NotFound {
                entity: "Payment",
                id: err.message,
            },
            ErrorCode::InvoiceNotFound => BillingError::NotFound {
                entity: "Invoice",
                id: err.message,
            },
            ErrorCode::PlanNotFound => BillingError::NotFound {
                entity: "Plan",
                id: err.message,
            },
            ErrorCode::SubscriberNotFound => BillingError::NotFound {
                entity: "Subscriber",
                id: err.message,
            },
            ErrorCode::InvalidStateTransition => BillingError::Precondition(err.message),
            ErrorCode::ValidationFailed => BillingError::Validation {
                field: err
                    .details
                    .get("field")
                    .cloned()
                    .unwrap_or_else(|| "input".to_string()),
                message: err.message,
            },
            ErrorCode::DuplicateIdempotencyKey
            | ErrorCode::ConcurrentModification
            | ErrorCode::ActiveSubscriptionExists
            | ErrorCode::SnapshotExists => BillingError::Conflict(err.message),
            ErrorCode::DatabaseError | ErrorCode::NotificationFailed | ErrorCode::InternalError => {
                BillingError::Infrastructure(err.message)
            }
        }
    }
}

impl From<ValidationError> for BillingError {
    fn from(err: ValidationError) -> Self {
        BillingError::Validation {
            field: err.field().to_string(),
            message: err.to_string(),
        }
    }
}

impl<S: fmt::Debug> From<TransitionError<S>> for BillingError {
    fn from(err: TransitionError<S>) -> Self {
        BillingError::Precondition(err.to_string())
    }
}
