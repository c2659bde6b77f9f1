//! Application handlers.
//!
//! Command handlers and services that orchestrate domain operations.

pub mod billing;
pub mod invoicing;

pub use billing::{
    BillingPolicy, CallbackOutcome, CallbackVerifier, GatewayRegistry,
    HandleGatewayCallbackCommand, HandleGatewayCallbackHandler, PayInvoiceCommand,
    PayInvoiceHandler, PayInvoiceResult, PaymentLedger, PlanSelector, RenewalScheduler,
    StartSubscriptionCommand, StartSubscriptionHandler, StartSubscriptionResult,
    SubscriptionStateMachine, SweepReport,
};
pub use invoicing::{FinalizedInvoice, InvoiceFinalizer};
