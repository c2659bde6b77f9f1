//! Payment gateway port.
//!
//! Both gateway families implement the same shape, but they are not
//! substitutable for renewals: [`PaymentGatewayAdapter::supports_recurring`]
//! tells the scheduler whether the gateway drives renewals itself.
//!
//! # Design
//!
//! - **Stateless**: adapters hold credentials and an HTTP client, nothing else
//! - **Translation only**: `confirm_payment` never writes; the ledger does
//! - **Typed failures**: transport, credentials and validation problems are
//!   distinct [`GatewayErrorCode`]s

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::domain::billing::{BillingError, PaymentGateway};
use crate::domain::foundation::{CompanyId, Money, SubscriptionId};
use crate::domain::payment::{Payable, PaymentResult};

#[async_trait]
pub trait PaymentGatewayAdapter: Send + Sync {
    /// Which gateway family this adapter services.
    fn gateway(&self) -> PaymentGateway;

    /// Asks the gateway to collect a payment.
    ///
    /// A failure means no money moved.
    async fn initiate_payment(&self, context: &PaymentContext)
        -> Result<GatewayResponse, GatewayError>;

    /// Parses a verified callback body into a normalized outcome.
    ///
    /// # Errors
    ///
    /// - `InvalidPayload` when required fields are missing
    /// - `UnsupportedEvent` for event types this adapter does not handle
    fn confirm_payment(&self, payload: &[u8]) -> Result<PaymentResult, GatewayError>;

    /// Attempts a remote cancellation.
    ///
    /// Gateways without subscriptions answer [`GatewayCancellation::Unsupported`];
    /// gateway-side refusals come back as [`GatewayCancellation::Rejected`]
    /// with the gateway's text.
    async fn cancel_subscription(
        &self,
        context: &CancellationContext,
    ) -> Result<GatewayCancellation, GatewayError>;

    /// True when the gateway bills renewals on its own schedule.
    fn supports_recurring(&self) -> bool;
}

/// Everything an adapter needs to request a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentContext {
    pub company_id: CompanyId,
    pub payable: Payable,
    pub amount: Money,

    /// Short reference shown to the payer (account reference, statement text).
    pub reference: String,

    pub description: String,
    pub idempotency_key: String,
    pub contact: PayerContact,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayerContact {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Gateway answer to an initiation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Checkout request id or payment intent id.
    pub transaction_id: String,

    /// Client-side secret for completing a card charge.
    pub client_secret: Option<String>,

    pub success: bool,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationContext {
    pub company_id: CompanyId,
    pub subscription_id: SubscriptionId,
    pub gateway_subscription_id: Option<String>,
}

/// Outcome of a remote cancellation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCancellation {
    Cancelled,
    /// Gateway refused; message is the gateway's own text.
    Rejected { message: String },
    /// Gateway has no concept of subscriptions.
    Unsupported { reason: String },
}

/// Gateway failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    pub code: GatewayErrorCode,
    pub message: String,

    /// Offending input, for validation failures.
    pub field: Option<String>,

    /// Provider's own error code, if it sent one.
    pub provider_code: Option<String>,

    pub retryable: bool,
}

impl GatewayError {
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            provider_code: None,
            retryable: code.is_retryable(),
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Transport, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Authentication, message)
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Validation, message).with_field(field)
    }

    pub fn declined(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Declined, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Unsupported, message)
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::InvalidPayload, message)
    }

    pub fn unsupported_event(event_type: impl fmt::Display) -> Self {
        Self::new(
            GatewayErrorCode::UnsupportedEvent,
            format!("unsupported event type '{}'", event_type),
        )
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Provider, message)
    }

    /// Converts into the billing taxonomy, naming the gateway.
    pub fn into_billing(self, gateway: PaymentGateway) -> BillingError {
        match self.code {
            GatewayErrorCode::Transport
            | GatewayErrorCode::Authentication
            | GatewayErrorCode::Declined
            | GatewayErrorCode::Provider => BillingError::gateway_transport(gateway, self.message),
            GatewayErrorCode::Validation => BillingError::validation(
                self.field.unwrap_or_else(|| "gateway_request".to_string()),
                self.message,
            ),
            GatewayErrorCode::Unsupported => BillingError::unsupported(self.message),
            GatewayErrorCode::InvalidPayload | GatewayErrorCode::UnsupportedEvent => {
                BillingError::invalid_payload(self.message)
            }
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorCode {
    /// Network failure, timeout, or 5xx from the gateway.
    Transport,

    /// Credentials rejected or token exchange failed.
    Authentication,

    /// Request input unusable (missing phone, bad amount).
    Validation,

    /// Gateway refused the charge.
    Declined,

    /// Operation not offered by this gateway.
    Unsupported,

    /// Callback body missing required fields.
    InvalidPayload,

    /// Callback event type not handled.
    UnsupportedEvent,

    /// Any other provider-side error.
    Provider,
}

impl GatewayErrorCode {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayErrorCode::Transport | GatewayErrorCode::Provider)
    }
}

impl fmt::Display for GatewayErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GatewayErrorCode::Transport => "transport_error",
            GatewayErrorCode::Authentication => "authentication_error",
            GatewayErrorCode::Validation => "validation_error",
            GatewayErrorCode::Declined => "declined",
            GatewayErrorCode::Unsupported => "unsupported",
            GatewayErrorCode::InvalidPayload => "invalid_payload",
            GatewayErrorCode::UnsupportedEvent => "unsupported_event",
            GatewayErrorCode::Provider => "provider_error",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_retryable() {
        assert!(GatewayError::transport("connection reset").retryable);
        assert!(!GatewayError::validation("phone", "missing").retryable);
    }

    #[test]
    fn conversion_keeps_validation_field() {
        let err = GatewayError::validation("phone", "phone number is missing")
            .into_billing(PaymentGateway::MobileMoney);
        assert_eq!(
            err,
            BillingError::validation("phone", "phone number is missing")
        );
        assert!(err.is_renewal_failure());
    }

    #[test]
    fn conversion_routes_transport_failures() {
        let err = GatewayError::authentication("bad consumer key")
            .into_billing(PaymentGateway::MobileMoney);
        assert!(matches!(err, BillingError::GatewayTransport { .. }));
    }

    #[test]
    fn conversion_of_payload_errors() {
        let err = GatewayError::unsupported_event("charge.refunded").into_billing(PaymentGateway::Card);
        assert_eq!(
            err,
            BillingError::invalid_payload("unsupported event type 'charge.refunded'")
        );
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(
            GatewayError::declined("insufficient funds").to_string(),
            "declined: insufficient funds"
        );
    }
}
