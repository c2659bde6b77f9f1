//! Stripe-specific types for API responses and webhook payloads.
//!
//! Only the fields billing reads are modelled; Stripe sends many more.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════════════════════
// Event Envelope
// ════════════════════════════════════════════════════════════════════════════════

/// Raw Stripe webhook event as received from the API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeWebhookEvent {
    /// Unique event identifier (evt_...).
    pub id: String,

    /// Event type (e.g., "payment_intent.succeeded").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix timestamp when the event was created.
    pub created: i64,

    pub data: StripeEventData,

    #[serde(default)]
    pub livemode: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeEventData {
    /// The object affected by this event.
    pub object: serde_json::Value,
}

/// Event types the card adapter turns into payment outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandledEvent {
    PaymentIntentSucceeded,
    PaymentIntentFailed,
    InvoicePaid,
    InvoicePaymentFailed,
}

impl HandledEvent {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "payment_intent.succeeded" => Some(Self::PaymentIntentSucceeded),
            "payment_intent.payment_failed" => Some(Self::PaymentIntentFailed),
            "invoice.paid" => Some(Self::InvoicePaid),
            "invoice.payment_failed" => Some(Self::InvoicePaymentFailed),
            _ => None,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Stripe Object Types
// ════════════════════════════════════════════════════════════════════════════════

/// Stripe PaymentIntent object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripePaymentIntent {
    /// Unique identifier (pi_...).
    pub id: String,

    /// Amount in the currency's minor unit.
    pub amount: i64,

    /// Currency (lowercase).
    pub currency: String,

    /// requires_payment_method, processing, succeeded, canceled, ...
    pub status: String,

    /// Returned on creation only.
    pub client_secret: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    pub last_payment_error: Option<StripePaymentError>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripePaymentError {
    pub code: Option<String>,
    pub decline_code: Option<String>,
    pub message: Option<String>,
}

/// Stripe Invoice object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeInvoice {
    /// Unique invoice identifier (in_...).
    pub id: String,

    pub customer: Option<String>,

    /// Associated subscription ID.
    pub subscription: Option<String>,

    /// Amount paid in cents.
    #[serde(default)]
    pub amount_paid: i64,

    /// Amount due in cents.
    #[serde(default)]
    pub amount_due: i64,

    /// Currency (lowercase).
    pub currency: String,

    /// Number of payment attempts made.
    #[serde(default)]
    pub attempt_count: i32,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Stripe Subscription object, as returned by the update endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

// ════════════════════════════════════════════════════════════════════════════════
// API Errors
// ════════════════════════════════════════════════════════════════════════════════

/// `{"error": {...}}` body Stripe returns with non-2xx statuses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeErrorEnvelope {
    pub error: StripeApiError,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeApiError {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub decline_code: Option<String>,
    pub message: Option<String>,
    pub param: Option<String>,
}

impl StripeErrorEnvelope {
    /// Parses an error body, falling back to `None` for non-JSON bodies.
    pub fn parse(body: &str) -> Option<StripeApiError> {
        serde_json::from_str::<StripeErrorEnvelope>(body)
            .ok()
            .map(|envelope| envelope.error)
    }
}
