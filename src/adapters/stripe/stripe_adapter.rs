//! Stripe card gateway adapter.
//!
//! Implements [`PaymentGatewayAdapter`] for card payments. One-off charges
//! are PaymentIntents; recurring charges are driven by Stripe subscriptions
//! and reported through `invoice.*` webhook events.
//!
//! Webhook signatures are checked before this adapter sees a payload; see
//! [`TimestampedSignatureVerifier`](crate::domain::billing::TimestampedSignatureVerifier).
//!
//! # Configuration
//!
//! ```ignore
//! let config = StripeConfig::new(api_key);
//! let adapter = StripeCardAdapter::new(config);
//! ```

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use uuid::Uuid;

use crate::domain::billing::PaymentGateway;
use crate::domain::foundation::{CompanyId, Currency, Money};
use crate::domain::payment::{Payable, PaymentResult};
use crate::ports::{
    CancellationContext, GatewayCancellation, GatewayError, GatewayResponse, PaymentContext,
    PaymentGatewayAdapter,
};

use super::webhook_types::{
    HandledEvent, StripeErrorEnvelope, StripeInvoice, StripePaymentIntent, StripeSubscription,
    StripeWebhookEvent,
};

pub const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Base URL for Stripe API (default: https://api.stripe.com).
    api_base_url: String,
}

impl StripeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base_url", &self.api_base_url)
            .finish_non_exhaustive()
    }
}

/// Card gateway adapter.
pub struct StripeCardAdapter {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripeCardAdapter {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    /// Form parameters for `POST /v1/payment_intents`.
    fn payment_intent_params(context: &PaymentContext) -> Vec<(String, String)> {
        let mut params = vec![
            ("amount".to_string(), context.amount.amount_minor().to_string()),
            (
                "currency".to_string(),
                context.amount.currency().as_str().to_lowercase(),
            ),
            ("description".to_string(), context.description.clone()),
            (
                "metadata[company_id]".to_string(),
                context.company_id.to_string(),
            ),
            (
                "metadata[payable_type]".to_string(),
                context.payable.payable_type().to_string(),
            ),
            (
                "metadata[payable_id]".to_string(),
                context.payable.payable_id().to_string(),
            ),
            (
                "metadata[idempotency_key]".to_string(),
                context.idempotency_key.clone(),
            ),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        if let Some(email) = &context.contact.email {
            params.push(("receipt_email".to_string(), email.clone()));
        }
        params
    }

    fn error_from_response(status: reqwest::StatusCode, body: &str) -> GatewayError {
        let api_error = StripeErrorEnvelope::parse(body);
        let message = api_error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| format!("Stripe API error: {}", body));

        let error = match status.as_u16() {
            401 => GatewayError::authentication(message),
            402 => GatewayError::declined(message),
            400 => match api_error.as_ref().and_then(|e| e.param.clone()) {
                Some(param) => GatewayError::validation(param, message),
                None => GatewayError::provider(message),
            },
            429 => GatewayError::transport(message),
            s if s >= 500 => GatewayError::transport(message),
            _ => GatewayError::provider(message),
        };

        match api_error.and_then(|e| e.decline_code.or(e.code)) {
            Some(code) => error.with_provider_code(code),
            None => error,
        }
    }

    fn parse_money(amount: i64, currency: &str) -> Result<Money, GatewayError> {
        let currency = Currency::new(currency.to_uppercase())
            .map_err(|e| GatewayError::invalid_payload(format!("currency: {}", e)))?;
        Ok(Money::new(amount, currency))
    }

    fn payment_intent_result(
        event: &StripeWebhookEvent,
        kind: HandledEvent,
    ) -> Result<PaymentResult, GatewayError> {
        let intent: StripePaymentIntent = serde_json::from_value(event.data.object.clone())
            .map_err(|e| GatewayError::invalid_payload(format!("invalid payment intent: {}", e)))?;

        let mut result = match kind {
            HandledEvent::PaymentIntentSucceeded => PaymentResult::confirmed(intent.id.clone()),
            _ => {
                let reason = intent
                    .last_payment_error
                    .as_ref()
                    .and_then(|e| e.message.clone())
                    .unwrap_or_else(|| "payment failed".to_string());
                PaymentResult::failed(intent.id.clone(), reason)
            }
        };

        result = result
            .with_metadata(json!({
                "event_id": event.id,
                "event_type": event.event_type,
                "payment_intent_status": intent.status,
            }))
            .with_amount(Self::parse_money(intent.amount, &intent.currency)?);

        if let Some(key) = intent.metadata.get("idempotency_key") {
            result = result.with_idempotency_key(key.clone());
        }
        if let Some((company_id, payable)) = attribution(&intent) {
            result = result.with_attribution(company_id, payable);
        }
        Ok(result)
    }

    fn invoice_result(
        event: &StripeWebhookEvent,
        kind: HandledEvent,
    ) -> Result<PaymentResult, GatewayError> {
        let invoice: StripeInvoice = serde_json::from_value(event.data.object.clone())
            .map_err(|e| GatewayError::invalid_payload(format!("invalid invoice: {}", e)))?;
        let subscription = invoice
            .subscription
            .clone()
            .ok_or_else(|| GatewayError::invalid_payload("invoice has no subscription"))?;

        let (result, amount) = match kind {
            HandledEvent::InvoicePaid => (
                PaymentResult::confirmed(invoice.id.clone()),
                invoice.amount_paid,
            ),
            _ => (
                PaymentResult::failed(
                    invoice.id.clone(),
                    format!("invoice payment failed (attempt {})", invoice.attempt_count),
                ),
                invoice.amount_due,
            ),
        };

        Ok(result
            .with_metadata(json!({
                "event_id": event.id,
                "event_type": event.event_type,
                "customer": invoice.customer,
                "attempt_count": invoice.attempt_count,
            }))
            .with_amount(Self::parse_money(amount, &invoice.currency)?)
            .with_gateway_subscription(subscription))
    }
}

/// Reads `company_id`/`payable_type`/`payable_id` written at initiation.
fn attribution(intent: &StripePaymentIntent) -> Option<(CompanyId, Payable)> {
    let company_id = intent.metadata.get("company_id")?.parse().ok()?;
    let payable_type = intent.metadata.get("payable_type")?;
    let payable_id = Uuid::parse_str(intent.metadata.get("payable_id")?).ok()?;
    let payable = Payable::from_parts(payable_type, payable_id).ok()?;
    Some((company_id, payable))
}

#[async_trait]
impl PaymentGatewayAdapter for StripeCardAdapter {
    fn gateway(&self) -> PaymentGateway {
        PaymentGateway::Card
    }

    async fn initiate_payment(
        &self,
        context: &PaymentContext,
    ) -> Result<GatewayResponse, GatewayError> {
        if !context.amount.is_positive() {
            return Err(GatewayError::validation("amount", "amount must be positive"));
        }

        let url = format!("{}/v1/payment_intents", self.config.api_base_url);
        let response = self
            .http_client
            .post(&url)
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .header("Idempotency-Key", &context.idempotency_key)
            .form(&Self::payment_intent_params(context))
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = %status,
                idempotency_key = %context.idempotency_key,
                "Stripe payment intent rejected"
            );
            return Err(Self::error_from_response(status, &error_text));
        }

        let intent: StripePaymentIntent = response.json().await.map_err(|e| {
            GatewayError::provider(format!("Failed to parse Stripe response: {}", e))
        })?;

        tracing::info!(
            payment_intent = %intent.id,
            idempotency_key = %context.idempotency_key,
            "Stripe payment intent created"
        );

        Ok(GatewayResponse {
            transaction_id: intent.id,
            client_secret: intent.client_secret,
            success: true,
            metadata: json!({ "status": intent.status }),
        })
    }

    fn confirm_payment(&self, payload: &[u8]) -> Result<PaymentResult, GatewayError> {
        let event: StripeWebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::invalid_payload(format!("invalid Stripe event: {}", e)))?;

        match HandledEvent::parse(&event.event_type) {
            Some(kind @ (HandledEvent::PaymentIntentSucceeded | HandledEvent::PaymentIntentFailed)) => {
                Self::payment_intent_result(&event, kind)
            }
            Some(kind @ (HandledEvent::InvoicePaid | HandledEvent::InvoicePaymentFailed)) => {
                Self::invoice_result(&event, kind)
            }
            None => Err(GatewayError::unsupported_event(&event.event_type)),
        }
    }

    async fn cancel_subscription(
        &self,
        context: &CancellationContext,
    ) -> Result<GatewayCancellation, GatewayError> {
        let Some(gateway_subscription_id) = context.gateway_subscription_id.as_deref() else {
            return Ok(GatewayCancellation::Unsupported {
                reason: "subscription has no Stripe counterpart".to_string(),
            });
        };

        let url = format!(
            "{}/v1/subscriptions/{}",
            self.config.api_base_url, gateway_subscription_id
        );
        let response = self
            .http_client
            .post(&url)
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .form(&[("cancel_at_period_end", "true")])
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = StripeErrorEnvelope::parse(&error_text)
                .and_then(|e| e.message)
                .unwrap_or(error_text);
            return Ok(GatewayCancellation::Rejected { message });
        }

        let subscription: StripeSubscription = response.json().await.map_err(|e| {
            GatewayError::provider(format!("Failed to parse Stripe response: {}", e))
        })?;
        tracing::info!(
            stripe_subscription = %subscription.id,
            status = %subscription.status,
            cancel_at_period_end = subscription.cancel_at_period_end,
            "Stripe subscription set to cancel"
        );
        Ok(GatewayCancellation::Cancelled)
    }

    fn supports_recurring(&self) -> bool {
        true
    }
}
