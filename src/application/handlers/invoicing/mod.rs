//! Invoicing handlers.
//!
//! - `InvoiceFinalizer` - seals drafts, serves snapshots, records compliance
//!   references

mod invoice_finalizer;

pub use invoice_finalizer::{FinalizedInvoice, InvoiceFinalizer};
