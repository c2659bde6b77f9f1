//! M-Pesa STK push adapter (Safaricom Daraja).
//!
//! Implements [`PaymentGatewayAdapter`] for mobile money. Every charge is a
//! push prompt to the payer's handset; there is no gateway-side subscription,
//! so renewals are driven by the scheduler and cancellation is local only.
//!
//! # Flow
//!
//! 1. Exchange consumer key/secret for a bearer token (cached until expiry)
//! 2. POST the STK request; the `CheckoutRequestID` becomes the transaction id
//! 3. Safaricom later POSTs the outcome to the configured callback URL
//!
//! # Configuration
//!
//! ```ignore
//! let config = MpesaConfig::new(key, secret, "174379", passkey, callback_url);
//! let adapter = MpesaStkAdapter::new(config);
//! ```

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::FixedOffset;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio::sync::Mutex;

use crate::domain::billing::PaymentGateway;
use crate::domain::foundation::{Currency, Money, Timestamp};
use crate::domain::payment::PaymentResult;
use crate::ports::{
    CancellationContext, GatewayCancellation, GatewayError, GatewayResponse, PaymentContext,
    PaymentGatewayAdapter,
};

use super::daraja_types::{
    AccessTokenResponse, DarajaErrorBody, StkCallbackEnvelope, StkPushRequest, StkPushResponse,
};
use super::phone::normalize_msisdn;

pub const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
pub const PRODUCTION_BASE_URL: &str = "https://api.safaricom.co.ke";

const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";

/// Daraja timestamps are East Africa Time.
const EAT_OFFSET_SECS: i32 = 3 * 3600;

/// Daraja caps `AccountReference` at 12 characters.
const MAX_ACCOUNT_REFERENCE: usize = 12;

/// Daraja caps `TransactionDesc` at 13 characters.
const MAX_TRANSACTION_DESC: usize = 13;

/// Refresh tokens this many seconds before Daraja says they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Daraja API configuration.
#[derive(Clone)]
pub struct MpesaConfig {
    consumer_key: SecretString,
    consumer_secret: SecretString,

    /// Paybill or till number.
    short_code: String,

    /// Lipa na M-Pesa online passkey.
    passkey: SecretString,

    /// Public URL Safaricom posts results to.
    callback_url: String,

    /// Base URL for Daraja (default: sandbox).
    api_base_url: String,
}

impl MpesaConfig {
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        short_code: impl Into<String>,
        passkey: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            consumer_key: SecretString::new(consumer_key.into()),
            consumer_secret: SecretString::new(consumer_secret.into()),
            short_code: short_code.into(),
            passkey: SecretString::new(passkey.into()),
            callback_url: callback_url.into(),
            api_base_url: SANDBOX_BASE_URL.to_string(),
        }
    }

    /// Point at the production Daraja host.
    pub fn production(mut self) -> Self {
        self.api_base_url = PRODUCTION_BASE_URL.to_string();
        self
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn short_code(&self) -> &str {
        &self.short_code
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }
}

impl std::fmt::Debug for MpesaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpesaConfig")
            .field("short_code", &self.short_code)
            .field("callback_url", &self.callback_url)
            .field("api_base_url", &self.api_base_url)
            .finish_non_exhaustive()
    }
}

struct CachedToken {
    value: String,
    expires_at: Timestamp,
}

/// Mobile-money gateway adapter.
pub struct MpesaStkAdapter {
    config: MpesaConfig,
    http_client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl MpesaStkAdapter {
    pub fn new(config: MpesaConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
            token: Mutex::new(None),
        }
    }

    /// `base64(short_code + passkey + timestamp)`.
    pub fn stk_password(&self, timestamp: &str) -> String {
        STANDARD.encode(format!(
            "{}{}{}",
            self.config.short_code,
            self.config.passkey.expose_secret(),
            timestamp
        ))
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        let now = Timestamp::now();
        if let Some(token) = cached.as_ref() {
            if now.is_before(&token.expires_at) {
                return Ok(token.value.clone());
            }
        }

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.api_base_url
        );
        let response = self
            .http_client
            .get(&url)
            .basic_auth(
                self.config.consumer_key.expose_secret(),
                Some(self.config.consumer_secret.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::transport(format!(
                "Daraja token endpoint returned {}",
                status
            )));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::authentication(format!(
                "Daraja token request rejected ({}): {}",
                status, error_text
            )));
        }

        let body: AccessTokenResponse = response.json().await.map_err(|e| {
            GatewayError::authentication(format!("Failed to parse Daraja token: {}", e))
        })?;

        let lifetime: i64 = body.expires_in.parse().unwrap_or(3599);
        let expires_at = Timestamp::from_unix_secs(
            now.as_unix_secs() + (lifetime - TOKEN_REFRESH_MARGIN_SECS).max(0),
        )
        .unwrap_or(now);

        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at,
        });
        Ok(body.access_token)
    }

    fn build_request(
        &self,
        context: &PaymentContext,
        phone: String,
        amount: i64,
        timestamp: String,
    ) -> StkPushRequest {
        StkPushRequest {
            business_short_code: self.config.short_code.clone(),
            password: self.stk_password(&timestamp),
            timestamp,
            transaction_type: TRANSACTION_TYPE.to_string(),
            amount,
            party_a: phone.clone(),
            party_b: self.config.short_code.clone(),
            phone_number: phone,
            callback_url: self.config.callback_url.clone(),
            account_reference: truncate(&context.reference, MAX_ACCOUNT_REFERENCE),
            transaction_desc: truncate(&context.description, MAX_TRANSACTION_DESC),
        }
    }

    fn error_from_response(status: reqwest::StatusCode, body: &str) -> GatewayError {
        let parsed: Option<DarajaErrorBody> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|b| b.error_message.clone())
            .unwrap_or_else(|| body.to_string());
        let code = parsed.and_then(|b| b.error_code);

        let error = if status.is_server_error() {
            GatewayError::transport(format!("Daraja returned {}: {}", status, message))
        } else if status == reqwest::StatusCode::UNAUTHORIZED {
            GatewayError::authentication(message)
        } else {
            GatewayError::declined(message)
        };

        match code {
            Some(code) => error.with_provider_code(code),
            None => error,
        }
    }
}

fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

#[async_trait]
impl PaymentGatewayAdapter for MpesaStkAdapter {
    fn gateway(&self) -> PaymentGateway {
        PaymentGateway::MobileMoney
    }

    async fn initiate_payment(
        &self,
        context: &PaymentContext,
    ) -> Result<GatewayResponse, GatewayError> {
        if context.amount.currency() != &Currency::kes() {
            return Err(GatewayError::validation(
                "currency",
                format!(
                    "M-Pesa only collects KES, got {}",
                    context.amount.currency()
                ),
            ));
        }
        let amount = context.amount.major_units_ceil();
        if amount <= 0 {
            return Err(GatewayError::validation("amount", "amount must be positive"));
        }

        let raw_phone = context
            .contact
            .phone
            .as_deref()
            .ok_or_else(|| GatewayError::validation("phone", "phone number is missing"))?;
        let phone = normalize_msisdn(raw_phone)
            .map_err(|e| GatewayError::validation("phone", e.to_string()))?;

        let token = self.access_token().await?;
        let eat = FixedOffset::east_opt(EAT_OFFSET_SECS)
            .ok_or_else(|| GatewayError::provider("invalid EAT offset"))?;
        let timestamp = Timestamp::now().compact_at(eat);
        let request = self.build_request(context, phone.clone(), amount, timestamp);

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.api_base_url);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = %status,
                idempotency_key = %context.idempotency_key,
                "STK push rejected"
            );
            return Err(Self::error_from_response(status, &error_text));
        }

        let body: StkPushResponse = response.json().await.map_err(|e| {
            GatewayError::provider(format!("Failed to parse STK push response: {}", e))
        })?;

        if body.response_code != "0" {
            return Err(GatewayError::declined(body.response_description)
                .with_provider_code(body.response_code));
        }

        tracing::info!(
            checkout_request_id = %body.checkout_request_id,
            idempotency_key = %context.idempotency_key,
            "STK push accepted"
        );

        Ok(GatewayResponse {
            transaction_id: body.checkout_request_id,
            client_secret: None,
            success: true,
            metadata: json!({
                "merchant_request_id": body.merchant_request_id,
                "customer_message": body.customer_message,
                "phone": phone,
                "amount": amount,
            }),
        })
    }

    fn confirm_payment(&self, payload: &[u8]) -> Result<PaymentResult, GatewayError> {
        let envelope: StkCallbackEnvelope = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::invalid_payload(format!("invalid STK callback: {}", e)))?;
        let callback = envelope.body.stk_callback;

        if callback.checkout_request_id.trim().is_empty() {
            return Err(GatewayError::invalid_payload("CheckoutRequestID is empty"));
        }

        if callback.result_code != 0 {
            return Ok(PaymentResult::failed(
                callback.checkout_request_id,
                callback.result_desc,
            )
            .with_metadata(json!({
                "merchant_request_id": callback.merchant_request_id,
                "result_code": callback.result_code,
            })));
        }

        let metadata = callback
            .callback_metadata
            .ok_or_else(|| GatewayError::invalid_payload("CallbackMetadata is missing"))?;
        let receipt = metadata
            .get_string("MpesaReceiptNumber")
            .ok_or_else(|| GatewayError::invalid_payload("MpesaReceiptNumber is missing"))?;

        let mut result = PaymentResult::confirmed(callback.checkout_request_id).with_metadata(json!({
            "merchant_request_id": callback.merchant_request_id,
            "mpesa_receipt_number": receipt,
            "amount": metadata.get("Amount").cloned(),
            "phone_number": metadata.get_string("PhoneNumber"),
            "transaction_date": metadata.get_string("TransactionDate"),
        }));

        if let Some(shillings) = metadata.get_amount("Amount") {
            let minor = (shillings * 100.0).round() as i64;
            result = result.with_amount(Money::new(minor, Currency::kes()));
        }

        Ok(result)
    }

    async fn cancel_subscription(
        &self,
        _context: &CancellationContext,
    ) -> Result<GatewayCancellation, GatewayError> {
        Ok(GatewayCancellation::Unsupported {
            reason: "unsupported: mobile money cancellation is internal only".to_string(),
        })
    }

    fn supports_recurring(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{CompanyId, SubscriptionId};
    use crate::domain::payment::{ConfirmationStatus, Payable};
    use crate::ports::PayerContact;

    fn adapter() -> MpesaStkAdapter {
        MpesaStkAdapter::new(MpesaConfig::new(
            "key",
            "secret",
            "174379",
            "bfb279f9aa9bdbcf158e97dd71a467cd",
            "https://billing.example.test/callbacks/mpesa",
        ))
    }

    fn context(phone: Option<&str>, amount: Money) -> PaymentContext {
        PaymentContext {
            company_id: CompanyId::new(),
            payable: Payable::Subscription(SubscriptionId::new()),
            amount,
            reference: "SUB-RENEWAL-000123".to_string(),
            description: "Subscription renewal".to_string(),
            idempotency_key: "renewal:x:1".to_string(),
            contact: PayerContact {
                name: None,
                email: None,
                phone: phone.map(str::to_string),
            },
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Configuration
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn config_defaults_to_sandbox() {
        let config = MpesaConfig::new("k", "s", "174379", "p", "https://cb");
        assert_eq!(config.api_base_url(), SANDBOX_BASE_URL);
        assert_eq!(config.clone().production().api_base_url(), PRODUCTION_BASE_URL);
        assert_eq!(
            config.with_base_url("http://127.0.0.1:9").api_base_url(),
            "http://127.0.0.1:9"
        );
    }

    #[test]
    fn config_debug_hides_secrets() {
        let config = MpesaConfig::new("k", "super-secret", "174379", "passkey-value", "https://cb");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("passkey-value"));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Request building
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn password_is_base64_of_shortcode_passkey_timestamp() {
        let adapter = adapter();
        let password = adapter.stk_password("20260102030405");
        let decoded = String::from_utf8(STANDARD.decode(password).unwrap()).unwrap();
        assert_eq!(
            decoded,
            "174379bfb279f9aa9bdbcf158e97dd71a467cd20260102030405"
        );
    }

    #[test]
    fn request_truncates_reference_and_description() {
        let adapter = adapter();
        let ctx = context(Some("0712345678"), Money::new(150_050, Currency::kes()));
        let req = adapter.build_request(&ctx, "254712345678".to_string(), 1501, "t".to_string());
        assert_eq!(req.account_reference, "SUB-RENEWAL-");
        assert_eq!(req.transaction_desc, "Subscription ");
        assert_eq!(req.party_b, "174379");
        assert_eq!(req.amount, 1501);
    }

    #[tokio::test]
    async fn initiate_rejects_missing_phone_before_any_network_call() {
        let adapter = adapter();
        let err = adapter
            .initiate_payment(&context(None, Money::new(100_000, Currency::kes())))
            .await
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("phone"));
    }

    #[tokio::test]
    async fn initiate_rejects_malformed_phone() {
        let adapter = adapter();
        let err = adapter
            .initiate_payment(&context(Some("12345"), Money::new(100_000, Currency::kes())))
            .await
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("phone"));
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn initiate_rejects_non_kes_amounts() {
        let adapter = adapter();
        let err = adapter
            .initiate_payment(&context(Some("0712345678"), Money::new(1000, Currency::usd())))
            .await
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("currency"));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Callback parsing
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn confirm_success_callback() {
        let body = br#"{"Body":{"stkCallback":{
            "MerchantRequestID":"29115-34620561-1",
            "CheckoutRequestID":"ws_CO_191220191020363925",
            "ResultCode":0,
            "ResultDesc":"The service request is processed successfully.",
            "CallbackMetadata":{"Item":[
                {"Name":"Amount","Value":1500},
                {"Name":"MpesaReceiptNumber","Value":"NLJ7RT61SV"},
                {"Name":"TransactionDate","Value":20191219102115},
                {"Name":"PhoneNumber","Value":254708374149}
            ]}}}}"#;
        let result = adapter().confirm_payment(body).unwrap();
        assert_eq!(result.status, ConfirmationStatus::Confirmed);
        assert_eq!(result.gateway_reference, "ws_CO_191220191020363925");
        assert_eq!(result.metadata["mpesa_receipt_number"], "NLJ7RT61SV");
        assert_eq!(result.metadata["phone_number"], "254708374149");
        assert_eq!(result.amount, Some(Money::new(150_000, Currency::kes())));
    }

    #[test]
    fn confirm_failed_callback_carries_result_desc() {
        let body = br#"{"Body":{"stkCallback":{
            "MerchantRequestID":"29115-34620561-1",
            "CheckoutRequestID":"ws_CO_1",
            "ResultCode":1032,
            "ResultDesc":"Request cancelled by user"}}}"#;
        let result = adapter().confirm_payment(body).unwrap();
        assert_eq!(result.status, ConfirmationStatus::Failed);
        assert_eq!(result.failure_reason.as_deref(), Some("Request cancelled by user"));
        assert_eq!(result.metadata["result_code"], 1032);
    }

    #[test]
    fn confirm_success_without_receipt_is_invalid() {
        let body = br#"{"Body":{"stkCallback":{
            "MerchantRequestID":"m","CheckoutRequestID":"ws_CO_1",
            "ResultCode":0,"ResultDesc":"ok",
            "CallbackMetadata":{"Item":[{"Name":"Amount","Value":10}]}}}}"#;
        let err = adapter().confirm_payment(body).unwrap_err();
        assert_eq!(err.code, crate::ports::GatewayErrorCode::InvalidPayload);
    }

    #[test]
    fn confirm_rejects_garbage() {
        let err = adapter().confirm_payment(b"not json").unwrap_err();
        assert_eq!(err.code, crate::ports::GatewayErrorCode::InvalidPayload);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Cancellation
    // ═══════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn cancel_is_unsupported() {
        let outcome = adapter()
            .cancel_subscription(&CancellationContext {
                company_id: CompanyId::new(),
                subscription_id: SubscriptionId::new(),
                gateway_subscription_id: None,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, GatewayCancellation::Unsupported { .. }));
        assert!(!adapter().supports_recurring());
    }

    #[test]
    fn error_mapping_by_status() {
        let err = MpesaStkAdapter::error_from_response(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"requestId":"1","errorCode":"400.002.02","errorMessage":"Bad Request - Invalid PhoneNumber"}"#,
        );
        assert_eq!(err.code, crate::ports::GatewayErrorCode::Declined);
        assert_eq!(err.provider_code.as_deref(), Some("400.002.02"));
        assert_eq!(err.message, "Bad Request - Invalid PhoneNumber");

        let err = MpesaStkAdapter::error_from_response(
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            "upstream down",
        );
        assert!(err.retryable);
    }
}
