//! Subscription status state machine.
//!
//! Edges:
//! - PENDING to ACTIVE on the first confirmed payment
//! - ACTIVE to ACTIVE on renewal
//! - ACTIVE to GRACE when a renewal fails or times out
//! - GRACE to ACTIVE on a late payment
//! - GRACE to EXPIRED once the grace window closes
//! - ACTIVE or GRACE to CANCELLED

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::StateMachine;

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created by signup or migration, awaiting the first payment.
    Pending,

    /// Paid up. Renewals keep it here.
    Active,

    /// Renewal failed. Still billable until the grace window closes.
    Grace,

    /// Grace window closed without payment.
    Expired,

    /// Ended by request or by gateway migration.
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Grace => "grace",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    /// ACTIVE and GRACE subscriptions are billed and retried.
    pub fn is_billable(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Grace)
    }

    /// True for PENDING, ACTIVE and GRACE. A company holds at most one of these.
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    pub fn all() -> [SubscriptionStatus; 5] {
        use SubscriptionStatus::*;
        [Pending, Active, Grace, Expired, Cancelled]
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            (Pending, Active)
                | (Active, Active) // Renewal
                | (Active, Grace)
                | (Active, Cancelled)
                | (Grace, Active) // Recovery
                | (Grace, Expired)
                | (Grace, Cancelled)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Pending => vec![Active],
            Active => vec![Active, Grace, Cancelled],
            Grace => vec![Active, Expired, Cancelled],
            Expired | Cancelled => vec![],
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubscriptionStatus::Pending),
            "active" => Ok(SubscriptionStatus::Active),
            "grace" => Ok(SubscriptionStatus::Grace),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(format!("unknown subscription status '{}'", other)),
        }
    }
}
