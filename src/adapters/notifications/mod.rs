//! Notification adapters.
//!
//! - `LoggingNotifier` - Emits each notice as a structured log event for a
//!   downstream mailer to pick up

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::ports::{BillingNotice, NoticeSubject, Notifier};

/// Writes notices to the tracing pipeline under the `billing.notice` target.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

impl LoggingNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, notice: BillingNotice, subject: NoticeSubject) -> Result<(), DomainError> {
        match subject {
            NoticeSubject::Subscription {
                company_id,
                subscription_id,
            } => tracing::info!(
                target: "billing.notice",
                notice = %notice,
                company_id = %company_id,
                subscription_id = %subscription_id,
                "billing notice"
            ),
            NoticeSubject::Invoice {
                company_id,
                invoice_id,
            } => tracing::info!(
                target: "billing.notice",
                notice = %notice,
                company_id = %company_id,
                invoice_id = %invoice_id,
                "billing notice"
            ),
        }
        Ok(())
    }
}
