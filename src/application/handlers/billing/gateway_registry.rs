//! GatewayRegistry - Adapter lookup by gateway family.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::billing::{BillingError, PaymentGateway};
use crate::ports::PaymentGatewayAdapter;

/// Holds one adapter per gateway family.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    adapters: HashMap<PaymentGateway, Arc<dyn PaymentGatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under the gateway it reports. Replaces any
    /// adapter already registered for that gateway.
    pub fn with(mut self, adapter: Arc<dyn PaymentGatewayAdapter>) -> Self {
        self.adapters.insert(adapter.gateway(), adapter);
        self
    }

    /// # Errors
    ///
    /// `Configuration` when no adapter is registered for `gateway`.
    pub fn get(&self, gateway: PaymentGateway) -> Result<Arc<dyn PaymentGatewayAdapter>, BillingError> {
        self.adapters.get(&gateway).cloned().ok_or_else(|| {
            BillingError::configuration(format!("no adapter registered for gateway {}", gateway))
        })
    }

    pub fn gateways(&self) -> Vec<PaymentGateway> {
        self.adapters.keys().copied().collect()
    }
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("gateways", &self.gateways())
            .finish()
    }
}
