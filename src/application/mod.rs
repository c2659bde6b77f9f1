//! Application layer - Services, Commands, and Handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Everything here takes the company id explicitly and the current time as
//! an argument; nothing reads ambient tenant or clock state.

pub mod handlers;

pub use handlers::{
    // Billing services
    BillingPolicy, GatewayRegistry, PaymentLedger, RenewalScheduler, SubscriptionStateMachine,
    SweepReport,
    // Billing commands
    CallbackOutcome, CallbackVerifier, HandleGatewayCallbackCommand, HandleGatewayCallbackHandler,
    PayInvoiceCommand, PayInvoiceHandler, PayInvoiceResult, PlanSelector, StartSubscriptionCommand,
    StartSubscriptionHandler, StartSubscriptionResult,
    // Invoicing
    FinalizedInvoice, InvoiceFinalizer,
};
