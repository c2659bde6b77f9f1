//! Billing domain module.
//!
//! Subscription lifecycle, plans, gateway selection and callback signatures.
//!
//! # Module Structure
//!
//! - `subscription` - Subscription aggregate
//! - `status` - SubscriptionStatus state machine
//! - `plan` - SubscriptionPlan and BillingPeriod
//! - `gateway` - PaymentGateway and the country rule
//! - `errors` - BillingError taxonomy
//! - `callback_signature` - HMAC verification for gateway callbacks

mod callback_signature;
mod errors;
mod gateway;
mod plan;
mod status;
mod subscription;

pub use callback_signature::{
    hex_decode, hex_encode, sign_body, sign_timestamped, BodySignatureVerifier,
    CallbackSignatureError, TimestampedSignature, TimestampedSignatureVerifier,
    DEFAULT_TOLERANCE_SECS,
};
pub use errors::BillingError;
pub use gateway::{CountryCode, PaymentGateway};
pub use plan::{BillingPeriod, PlanLimits, SubscriptionPlan};
pub use status::SubscriptionStatus;
pub use subscription::{AppliedPayment, PaymentTransition, Subscription};
