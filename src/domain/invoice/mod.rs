//! Invoice domain module.
//!
//! - `invoice` - Invoice aggregate (draft, finalized, paid)
//! - `snapshot` - Immutable snapshot captured at finalization

#[allow(clippy::module_inception)]
mod invoice;
mod snapshot;

pub use invoice::{Invoice, InvoiceStatus, InvoiceTotals, LineItem, Party};
pub use snapshot::InvoiceSnapshot;
