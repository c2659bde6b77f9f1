//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Gateway Ports
//!
//! - `PaymentGatewayAdapter` - Initiate, confirm and cancel at a payment gateway
//!
//! ## Storage Ports
//!
//! - `SubscriptionRepository` - Subscriptions with audit, versioning and the
//!   one-open-subscription-per-company rule
//! - `PaymentRepository` / `LedgerTransaction` - Atomic ledger units
//! - `InvoiceRepository` - Invoices and finalization snapshots
//!
//! ## Collaborator Ports
//!
//! - `Notifier` - Outbound billing notices
//! - `SubscriberDirectory` - Subscriber contact details and country
//! - `PlanCatalog` - Read-only plans

mod invoice_repository;
mod notifier;
mod payment_gateway;
mod payment_repository;
mod plan_catalog;
mod subscriber_directory;
mod subscription_repository;

pub use invoice_repository::InvoiceRepository;
pub use notifier::{BillingNotice, NoticeSubject, Notifier};
pub use payment_gateway::{
    CancellationContext, GatewayCancellation, GatewayError, GatewayErrorCode, GatewayResponse,
    PayerContact, PaymentContext, PaymentGatewayAdapter,
};
pub use payment_repository::{LedgerTransaction, PaymentRepository};
pub use plan_catalog::PlanCatalog;
pub use subscriber_directory::{SubscriberDirectory, SubscriberProfile};
pub use subscription_repository::SubscriptionRepository;
