//! Payment domain module.
//!
//! - `payment` - Payment entity and its forward-only status
//! - `payable` - Subscription or Invoice target
//! - `confirmation` - Normalized gateway callback outcome

mod confirmation;
mod payable;
#[allow(clippy::module_inception)]
mod payment;

pub use confirmation::{ConfirmationStatus, PaymentResult};
pub use payable::Payable;
pub use payment::{Payment, PaymentStatus};
