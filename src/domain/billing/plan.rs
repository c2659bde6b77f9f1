//! Subscription plans and billing periods.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{Money, PlanId, Timestamp};

/// Length of one billing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Quarterly,
    Annual,
}

impl BillingPeriod {
    pub fn months(&self) -> u32 {
        match self {
            BillingPeriod::Monthly => 1,
            BillingPeriod::Quarterly => 3,
            BillingPeriod::Annual => 12,
        }
    }

    /// Moves a timestamp forward by one period using calendar months.
    pub fn advance(&self, from: Timestamp) -> Timestamp {
        from.add_months(self.months())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Quarterly => "quarterly",
            BillingPeriod::Annual => "annual",
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BillingPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingPeriod::Monthly),
            "quarterly" => Ok(BillingPeriod::Quarterly),
            "annual" | "yearly" => Ok(BillingPeriod::Annual),
            other => Err(format!("unknown billing period '{}'", other)),
        }
    }
}

/// Usage caps attached to a plan. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub invoices_per_month: Option<u32>,
    pub users: Option<u32>,
    pub customers: Option<u32>,
}

/// A pricing tier. Read-only from the billing core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: PlanId,
    pub code: String,
    pub name: String,
    pub price: Money,
    pub billing_period: BillingPeriod,
    pub limits: PlanLimits,
}
