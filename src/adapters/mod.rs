//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the billing core to external systems:
//! - `mpesa` / `stripe` - Payment gateways
//! - `postgres` - Durable storage
//! - `memory` - In-memory storage and scriptable gateways for tests
//! - `notifications` - Outbound billing notices
//! - `http` - Gateway callback endpoints

pub mod http;
pub mod memory;
pub mod mpesa;
pub mod notifications;
pub mod postgres;
pub mod stripe;

pub use memory::{InMemoryBillingStore, MockGatewayAdapter};
pub use mpesa::MpesaStkAdapter;
pub use notifications::LoggingNotifier;
pub use stripe::StripeCardAdapter;
