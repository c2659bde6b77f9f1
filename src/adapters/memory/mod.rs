//! In-memory adapters for tests and local development.
//!
//! These are not durable. Production wiring uses the PostgreSQL adapters.

mod billing_store;
mod collaborators;
mod mock_gateway;

pub use billing_store::{InMemoryBillingStore, InMemoryLedgerTransaction};
pub use collaborators::{InMemoryNotifier, InMemoryPlanCatalog, InMemorySubscriberDirectory};
pub use mock_gateway::MockGatewayAdapter;
