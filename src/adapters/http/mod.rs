//! HTTP adapters.
//!
//! Only gateway callbacks are exposed over HTTP.

pub mod callbacks;

pub use callbacks::{callback_router, CallbackAppState};
