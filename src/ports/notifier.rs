//! Notification sender port.
//!
//! Delivery is best-effort from the core's point of view: callers log a
//! failed notification and keep the transition that triggered it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{CompanyId, DomainError, InvoiceId, SubscriptionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingNotice {
    RenewalReminder,
    GraceStarted,
    SubscriptionExpired,
    SubscriptionCancelled,
    GatewayMigrated,
    InvoicePaid,
}

impl BillingNotice {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingNotice::RenewalReminder => "renewal_reminder",
            BillingNotice::GraceStarted => "grace_started",
            BillingNotice::SubscriptionExpired => "subscription_expired",
            BillingNotice::SubscriptionCancelled => "subscription_cancelled",
            BillingNotice::GatewayMigrated => "gateway_migrated",
            BillingNotice::InvoicePaid => "invoice_paid",
        }
    }
}

impl fmt::Display for BillingNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a notice is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoticeSubject {
    Subscription {
        company_id: CompanyId,
        subscription_id: SubscriptionId,
    },
    Invoice {
        company_id: CompanyId,
        invoice_id: InvoiceId,
    },
}

impl NoticeSubject {
    pub fn company_id(&self) -> CompanyId {
        match self {
            NoticeSubject::Subscription { company_id, .. }
            | NoticeSubject::Invoice { company_id, .. } => *company_id,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: BillingNotice, subject: NoticeSubject) -> Result<(), DomainError>;
}
