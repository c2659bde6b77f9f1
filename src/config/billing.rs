//! Billing policy configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::application::BillingPolicy;

/// Renewal and sweep tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,

    #[serde(default = "default_reminder_days_before")]
    pub reminder_days_before: i64,

    #[serde(default = "default_payment_timeout_minutes")]
    pub payment_timeout_minutes: i64,

    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,

    /// Seconds between scheduler runs
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl BillingConfig {
    pub fn policy(&self) -> BillingPolicy {
        BillingPolicy {
            grace_period_days: self.grace_period_days,
            reminder_days_before: self.reminder_days_before,
            payment_timeout_minutes: self.payment_timeout_minutes,
            sweep_concurrency: self.sweep_concurrency,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.grace_period_days < 1 {
            return Err(ValidationError::InvalidBillingSetting("grace_period_days"));
        }
        if self.reminder_days_before < 0 {
            return Err(ValidationError::InvalidBillingSetting("reminder_days_before"));
        }
        if self.payment_timeout_minutes < 1 {
            return Err(ValidationError::InvalidBillingSetting("payment_timeout_minutes"));
        }
        if self.sweep_concurrency == 0 {
            return Err(ValidationError::InvalidBillingSetting("sweep_concurrency"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::InvalidBillingSetting("sweep_interval_secs"));
        }
        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            grace_period_days: default_grace_period_days(),
            reminder_days_before: default_reminder_days_before(),
            payment_timeout_minutes: default_payment_timeout_minutes(),
            sweep_concurrency: default_sweep_concurrency(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_grace_period_days() -> i64 {
    7
}

fn default_reminder_days_before() -> i64 {
    3
}

fn default_payment_timeout_minutes() -> i64 {
    15
}

fn default_sweep_concurrency() -> usize {
    8
}

fn default_sweep_interval_secs() -> u64 {
    300
}
