//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers, and error types
//! that form the vocabulary of the billing domain.

mod audit;
mod errors;
mod ids;
mod money;
mod state_machine;
mod timestamp;

pub use audit::{AuditEntry, SYSTEM_ACTOR};
pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{CompanyId, InvoiceId, PaymentId, PlanId, SnapshotId, SubscriptionId, UserId};
pub use money::{Currency, Money};
pub use state_machine::{StateMachine, TransitionError};
pub use timestamp::Timestamp;
