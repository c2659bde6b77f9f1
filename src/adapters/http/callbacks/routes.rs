//! Axum router for gateway callbacks.

use axum::{routing::post, Router};

use super::handlers::{mpesa_callback, stripe_callback, CallbackAppState};

/// Callback routes, mounted at `/callbacks`.
///
/// # Routes
/// - `POST /callbacks/mpesa` - Mobile money STK results
/// - `POST /callbacks/stripe` - Stripe events
pub fn callback_router() -> Router<CallbackAppState> {
    Router::new().nest(
        "/callbacks",
        Router::new()
            .route("/mpesa", post(mpesa_callback))
            .route("/stripe", post(stripe_callback)),
    )
}
