//! Timezone rule engine: UTC to local conversion with DST awareness.
//!
//! The device keeps its clock in UTC and converts on demand. The rule here
//! covers European-style timezones (the lamp ships configured for Berlin,
//! CET/CEST): daylight-saving time runs from the last Sunday of March to
//! the last Sunday of October, switching at 01:00 UTC in both directions.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc, Weekday};

/// Converts a UTC instant into local wall time and reports whether the
/// instant falls in daylight-saving time.
pub trait TimezoneRule {
    /// Offset from UTC in seconds at the given instant.
    fn utc_offset_secs(&self, utc: DateTime<Utc>) -> i32;

    /// Whether daylight-saving time is in effect at the given instant.
    fn is_dst(&self, utc: DateTime<Utc>) -> bool;

    /// Local wall time for the given UTC instant.
    fn to_local(&self, utc: DateTime<Utc>) -> NaiveDateTime {
        utc.naive_utc() + Duration::seconds(self.utc_offset_secs(utc) as i64)
    }
}

/// European DST rule with fixed standard/summer offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EuropeanTzRule {
    name: &'static str,
    std_offset_secs: i32,
    dst_offset_secs: i32,
}

impl EuropeanTzRule {
    /// Berlin: CET (UTC+1) in winter, CEST (UTC+2) in summer.
    pub fn berlin() -> Self {
        Self {
            name: "Berlin",
            std_offset_secs: 3600,
            dst_offset_secs: 7200,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// DST interval bounds for a year: last Sunday of March and last Sunday
    /// of October, both at 01:00 UTC.
    fn dst_bounds(year: i32) -> (NaiveDateTime, NaiveDateTime) {
        let start = last_sunday(year, 3).and_hms_opt(1, 0, 0).unwrap();
        let end = last_sunday(year, 10).and_hms_opt(1, 0, 0).unwrap();
        (start, end)
    }
}

impl Default for EuropeanTzRule {
    fn default() -> Self {
        Self::berlin()
    }
}

impl TimezoneRule for EuropeanTzRule {
    fn utc_offset_secs(&self, utc: DateTime<Utc>) -> i32 {
        if self.is_dst(utc) {
            self.dst_offset_secs
        } else {
            self.std_offset_secs
        }
    }

    fn is_dst(&self, utc: DateTime<Utc>) -> bool {
        let (start, end) = Self::dst_bounds(utc.year());
        let naive = utc.naive_utc();
        naive >= start && naive < end
    }
}

/// Date of the last Sunday in the given month.
fn last_sunday(year: i32, month: u32) -> NaiveDate {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .unwrap();
    let mut day = first_of_next - Duration::days(1);
    while day.weekday() != Weekday::Sun {
        day -= Duration::days(1);
    }
    day
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_last_sunday_of_march_2026() {
        assert_eq!(
            last_sunday(2026, 3),
            NaiveDate::from_ymd_opt(2026, 3, 29).unwrap()
        );
    }

    #[test]
    fn test_last_sunday_of_october_2026() {
        assert_eq!(
            last_sunday(2026, 10),
            NaiveDate::from_ymd_opt(2026, 10, 25).unwrap()
        );
    }

    #[test]
    fn test_winter_is_standard_time() {
        let rule = EuropeanTzRule::berlin();
        let jan = utc(2026, 1, 15, 12, 0, 0);
        assert!(!rule.is_dst(jan));
        assert_eq!(rule.utc_offset_secs(jan), 3600);
    }

    #[test]
    fn test_summer_is_dst() {
        let rule = EuropeanTzRule::berlin();
        let jul = utc(2026, 7, 15, 12, 0, 0);
        assert!(rule.is_dst(jul));
        assert_eq!(rule.utc_offset_secs(jul), 7200);
    }

    #[test]
    fn test_spring_transition_boundary() {
        let rule = EuropeanTzRule::berlin();
        // 2026-03-29 is the last Sunday of March; switch at 01:00 UTC.
        assert!(!rule.is_dst(utc(2026, 3, 29, 0, 59, 59)));
        assert!(rule.is_dst(utc(2026, 3, 29, 1, 0, 0)));
    }

    #[test]
    fn test_autumn_transition_boundary() {
        let rule = EuropeanTzRule::berlin();
        // 2026-10-25 is the last Sunday of October; switch at 01:00 UTC.
        assert!(rule.is_dst(utc(2026, 10, 25, 0, 59, 59)));
        assert!(!rule.is_dst(utc(2026, 10, 25, 1, 0, 0)));
    }

    #[test]
    fn test_to_local_winter() {
        let rule = EuropeanTzRule::berlin();
        let instant = utc(2026, 1, 15, 12, 0, 0);
        let local = rule.to_local(instant);
        assert_eq!(local.format("%Y-%m-%d %H:%M:%S").to_string(), "2026-01-15 13:00:00");
    }

    #[test]
    fn test_to_local_summer() {
        let rule = EuropeanTzRule::berlin();
        let instant = utc(2026, 7, 15, 12, 0, 0);
        let local = rule.to_local(instant);
        assert_eq!(local.format("%Y-%m-%d %H:%M:%S").to_string(), "2026-07-15 14:00:00");
    }

    #[test]
    fn test_epoch_1700000000_is_standard_time() {
        // 2023-11-14 22:13:20 UTC, well after the October switch.
        let rule = EuropeanTzRule::berlin();
        let instant = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        assert!(!rule.is_dst(instant));
        assert_eq!(
            rule.to_local(instant).format("%H:%M:%S").to_string(),
            "23:13:20"
        );
    }
}
