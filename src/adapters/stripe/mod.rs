//! Stripe card gateway adapter.
//!
//! Implements the `PaymentGatewayAdapter` port for card payments:
//! - PaymentIntents for signups and invoice payments
//! - `invoice.*` events for Stripe-driven renewals
//! - Remote cancellation at period end
//!
//! # Configuration
//!
//! - `INVOICER__STRIPE__API_KEY`: Stripe secret API key
//! - `INVOICER__STRIPE__WEBHOOK_SECRET`: Webhook signing secret (whsec_...)

mod stripe_adapter;
mod webhook_types;

pub use stripe_adapter::{StripeCardAdapter, StripeConfig, DEFAULT_API_BASE_URL};
pub use webhook_types::{
    HandledEvent, StripeApiError, StripeErrorEnvelope, StripeInvoice, StripePaymentIntent,
    StripeSubscription, StripeWebhookEvent,
};
