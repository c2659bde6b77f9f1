//! Billing handlers.
//!
//! ## Core services
//! - `PaymentLedger` - idempotent, forward-only payment writes
//! - `SubscriptionStateMachine` - every subscription status change
//! - `RenewalScheduler` - periodic renewal, grace, reminder, timeout and
//!   country sweeps
//!
//! ## Commands
//! - Starting a subscription
//! - Paying an invoice
//! - Handling gateway callbacks

mod gateway_registry;
mod handle_gateway_callback;
mod pay_invoice;
mod payment_ledger;
mod policy;
mod renewal_scheduler;
mod start_subscription;
mod subscription_state_machine;

#[cfg(test)]
pub(crate) mod test_support;

pub use gateway_registry::GatewayRegistry;
pub use policy::BillingPolicy;

// Services
pub use payment_ledger::{
    callback_idempotency_key, InitiationRecord, LedgerDisposition, LedgerOutcome, PaymentLedger,
    RecordInitiationCommand, RecordPaymentCommand,
};
pub use renewal_scheduler::{RenewalScheduler, SweepReport};
pub use subscription_state_machine::{
    CancelSubscriptionCommand, CancelSubscriptionResult, MigrationResult, PaymentApplied,
    RemoteCancellation, SubscriptionStateMachine,
};

// Commands
pub use handle_gateway_callback::{
    CallbackOutcome, CallbackVerifier, HandleGatewayCallbackCommand, HandleGatewayCallbackHandler,
};
pub use pay_invoice::{invoice_payment_key, PayInvoiceCommand, PayInvoiceHandler, PayInvoiceResult};
pub use start_subscription::{
    PlanSelector, StartSubscriptionCommand, StartSubscriptionHandler, StartSubscriptionResult,
};
