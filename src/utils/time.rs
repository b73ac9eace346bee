//! Conversions between wall-clock timestamps and configured durations

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Convert a configured duration, saturating instead of failing on overflow
pub fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// `at + delta`, clamped to the latest representable instant
pub fn saturating_add(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    at.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time from `earlier` to `now`, zero when `earlier` lies in the future
pub fn elapsed_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(earlier)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_saturating_add_clamps() {
        let at = DateTime::<Utc>::MAX_UTC;
        assert_eq!(saturating_add(at, TimeDelta::days(1)), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_elapsed_between_never_negative() {
        let early = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2020, 1, 1, 0, 1, 0).unwrap();
        assert_eq!(elapsed_between(early, late), Duration::from_secs(60));
        assert_eq!(elapsed_between(late, early), Duration::ZERO);
    }

    #[test]
    fn test_huge_durations_saturate() {
        assert_eq!(to_time_delta(Duration::MAX), TimeDelta::MAX);
        assert_eq!(to_time_delta(Duration::from_secs(90)), TimeDelta::seconds(90));
    }
}
