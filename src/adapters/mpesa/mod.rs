//! M-Pesa (Safaricom Daraja) mobile-money adapter.
//!
//! Implements the `PaymentGatewayAdapter` port with STK push. Callbacks are
//! signed by the relay in front of this service with `X-Callback-Signature`.
//!
//! # Configuration
//!
//! - `INVOICER__MPESA__CONSUMER_KEY` / `INVOICER__MPESA__CONSUMER_SECRET`
//! - `INVOICER__MPESA__SHORT_CODE` / `INVOICER__MPESA__PASSKEY`
//! - `INVOICER__MPESA__CALLBACK_URL`
//! - `INVOICER__MPESA__CALLBACK_SECRET`

mod daraja_types;
mod phone;
mod stk_adapter;

pub use daraja_types::{
    AccessTokenResponse, CallbackItem, CallbackMetadata, StkCallback, StkCallbackEnvelope,
    StkPushRequest, StkPushResponse,
};
pub use phone::normalize_msisdn;
pub use stk_adapter::{MpesaConfig, MpesaStkAdapter, PRODUCTION_BASE_URL, SANDBOX_BASE_URL};
