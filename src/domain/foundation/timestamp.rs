//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, FixedOffset, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Creates a timestamp from Unix seconds, returning `None` when out of range.
    pub fn from_unix_secs(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(Self)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Returns the timestamp as Unix seconds.
    pub fn as_unix_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Returns the duration from another timestamp to this one.
    ///
    /// Returns negative duration if other is after self.
    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        self.0.signed_duration_since(other.0)
    }

    /// Creates a new timestamp by adding the specified number of days.
    ///
    /// Negative values subtract days.
    pub fn add_days(&self, days: i64) -> Self {
        Self(self.0 + Duration::days(days))
    }

    /// Creates a new timestamp by adding the specified number of minutes.
    pub fn add_minutes(&self, minutes: i64) -> Self {
        Self(self.0 + Duration::minutes(minutes))
    }

    /// Adds calendar months, clamping to the last day of shorter months
    /// (Jan 31 + 1 month = Feb 28/29).
    pub fn add_months(&self, months: u32) -> Self {
        self.0
            .checked_add_months(Months::new(months))
            .map(Self)
            .unwrap_or(*self)
    }

    /// Formats as `YYYYMMDDHHmmss` in the given offset, the layout
    /// mobile-money APIs expect.
    pub fn compact_at(&self, offset: FixedOffset) -> String {
        self.0.with_timezone(&offset).format("%Y%m%d%H%M%S").to_string()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn at(y: i32, m: u32, d: u32) -> Timestamp {
        Timestamp::from_datetime(Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap())
    }

    #[test]
    fn add_days_moves_forward_and_back() {
        let ts = at(2026, 3, 10);
        assert_eq!(ts.add_days(5), at(2026, 3, 15));
        assert_eq!(ts.add_days(-10), at(2026, 2, 28));
    }

    #[test]
    fn add_months_clamps_to_month_end() {
        let ts = at(2026, 1, 31);
        let next = ts.add_months(1);
        assert_eq!(next.as_datetime().month(), 2);
        assert_eq!(next.as_datetime().day(), 28);
    }

    #[test]
    fn add_months_handles_year_rollover() {
        let ts = at(2026, 11, 15);
        assert_eq!(ts.add_months(3), at(2027, 2, 15));
    }

    #[test]
    fn compact_format_applies_offset() {
        let ts = Timestamp::from_datetime(Utc.with_ymd_and_hms(2026, 4, 2, 22, 5, 7).unwrap());
        assert_eq!(ts.compact_at(FixedOffset::east_opt(0).unwrap()), "20260402220507");
        assert_eq!(
            ts.compact_at(FixedOffset::east_opt(3 * 3600).unwrap()),
            "20260403010507"
        );
    }

    #[test]
    fn unix_secs_roundtrip() {
        let ts = Timestamp::from_unix_secs(1_767_225_600).unwrap();
        assert_eq!(ts.as_unix_secs(), 1_767_225_600);
    }

    #[test]
    fn ordering_follows_time() {
        let earlier = at(2026, 1, 1);
        let later = at(2026, 1, 2);
        assert!(earlier.is_before(&later));
        assert!(later.is_after(&earlier));
        assert!(earlier < later);
    }
}
