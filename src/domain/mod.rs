//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, IDs, money, errors)
//! - `billing` - Subscription lifecycle, plans, gateways, callback signatures
//! - `payment` - Payments and their forward-only status
//! - `invoice` - Invoices and finalization snapshots

pub mod billing;
pub mod foundation;
pub mod invoice;
pub mod payment;
