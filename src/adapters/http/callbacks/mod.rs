//! HTTP adapter for gateway callbacks.
//!
//! - `POST /callbacks/mpesa` - STK push results, signed in `X-Callback-Signature`
//! - `POST /callbacks/stripe` - Stripe events, signed in `Stripe-Signature`
//!
//! Neither route authenticates a user; the signature over the raw body is
//! the only credential and is checked before the body is parsed.

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::CallbackResponse;
pub use handlers::{CallbackApiError, CallbackAppState};
pub use routes::callback_router;
