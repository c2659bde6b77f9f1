//! Axum handlers for gateway callbacks.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use crate::application::handlers::billing::{HandleGatewayCallbackCommand, HandleGatewayCallbackHandler};
use crate::domain::billing::{BillingError, PaymentGateway};
use crate::domain::foundation::Timestamp;

use super::dto::CallbackResponse;

/// Header carrying the hex body signature on mobile money callbacks.
pub const MPESA_SIGNATURE_HEADER: &str = "X-Callback-Signature";

/// Header carrying the timestamped signature on Stripe events.
pub const STRIPE_SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Clone)]
pub struct CallbackAppState {
    pub handler: Arc<HandleGatewayCallbackHandler>,
}

impl CallbackAppState {
    pub fn new(handler: Arc<HandleGatewayCallbackHandler>) -> Self {
        Self { handler }
    }
}

/// POST /callbacks/mpesa
pub async fn mpesa_callback(
    State(state): State<CallbackAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, CallbackApiError> {
    dispatch(&state, PaymentGateway::MobileMoney, MPESA_SIGNATURE_HEADER, &headers, body).await
}

/// POST /callbacks/stripe
pub async fn stripe_callback(
    State(state): State<CallbackAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, CallbackApiError> {
    dispatch(&state, PaymentGateway::Card, STRIPE_SIGNATURE_HEADER, &headers, body).await
}

async fn dispatch(
    state: &CallbackAppState,
    gateway: PaymentGateway,
    signature_header: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackResponse>, CallbackApiError> {
    let signature = headers
        .get(signature_header)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let cmd = HandleGatewayCallbackCommand {
        gateway,
        payload: body.to_vec(),
        signature,
    };
    let outcome = state.handler.handle(cmd, Timestamp::now()).await?;
    Ok(Json(CallbackResponse::ok(outcome.message())))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// Maps billing errors onto callback responses. Gateways retry on 5xx, so
/// anything that may succeed later must not be a 4xx.
#[derive(Debug)]
pub struct CallbackApiError(BillingError);

impl From<BillingError> for CallbackApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

impl IntoResponse for CallbackApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self.0 {
            BillingError::InvalidSignature(_) | BillingError::InvalidPayload(_) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            other => {
                tracing::error!(
                    code = other.code(),
                    error = %other,
                    retryable = other.is_retryable(),
                    "Callback processing failed"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Callback could not be processed".to_string(),
                )
            }
        };
        (status, Json(CallbackResponse::error(message))).into_response()
    }
}
