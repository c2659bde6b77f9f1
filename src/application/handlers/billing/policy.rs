//! Billing policy knobs shared by the state machine and the scheduler.

/// Grace, reminder and timeout windows plus sweep fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPolicy {
    /// Days a subscription stays in GRACE before it expires.
    pub grace_period_days: i64,

    /// Days before `next_billing_at` that the renewal reminder goes out.
    pub reminder_days_before: i64,

    /// Minutes an INITIATED payment may wait for its callback.
    pub payment_timeout_minutes: i64,

    /// Items processed concurrently within one sweep.
    pub sweep_concurrency: usize,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            grace_period_days: 7,
            reminder_days_before: 3,
            payment_timeout_minutes: 15,
            sweep_concurrency: 8,
        }
    }
}
