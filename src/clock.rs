use chrono::{DateTime, Days, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Buckets instants into business days of a fixed reference timezone, so the quota resets at the
/// same moment no matter where the server runs.
#[derive(Debug, Clone, Copy)]
pub struct BusinessClock {
    tz: Tz,
}

impl BusinessClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    pub fn today(&self) -> NaiveDate {
        self.day_of(Utc::now())
    }

    /// First instant of `day` in the reference timezone.
    pub fn day_start(&self, day: NaiveDate) -> DateTime<Utc> {
        let midnight = day.and_time(NaiveTime::MIN);
        let local = match self.tz.from_local_datetime(&midnight) {
            LocalResult::Single(t) => t,
            LocalResult::Ambiguous(earliest, _) => earliest,
            // Midnight falls in a DST gap: the day starts at the first local time that exists.
            LocalResult::None => (1..=96)
                .find_map(|q| {
                    self.tz
                        .from_local_datetime(&(midnight + Duration::minutes(15 * q)))
                        .earliest()
                })
                .unwrap_or_else(|| self.tz.from_utc_datetime(&midnight)),
        };
        local.with_timezone(&Utc)
    }

    /// Half-open UTC range `[start, end)` covering `day`.
    pub fn day_bounds(&self, day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let next = day.succ_opt().unwrap_or(NaiveDate::MAX);
        (self.day_start(day), self.day_start(next))
    }

    /// The `days` business days ending with `last`, oldest first.
    pub fn trailing_days(&self, last: NaiveDate, days: u32) -> Vec<NaiveDate> {
        (0..days)
            .rev()
            .filter_map(|back| last.checked_sub_days(Days::new(u64::from(back))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_day_of_uses_reference_zone() {
        let clock = BusinessClock::new(chrono_tz::Asia::Kolkata);
        // 20:00 UTC is already 01:30 the next morning in IST
        assert_eq!(clock.day_of(utc("2024-01-01T20:00:00Z")), date("2024-01-02"));
        assert_eq!(clock.day_of(utc("2024-01-01T18:29:59Z")), date("2024-01-01"));
    }

    #[test]
    fn test_day_bounds_in_ist() {
        let clock = BusinessClock::new(chrono_tz::Asia::Kolkata);
        let (start, end) = clock.day_bounds(date("2024-01-02"));
        assert_eq!(start, utc("2024-01-01T18:30:00Z"));
        assert_eq!(end, utc("2024-01-02T18:30:00Z"));
    }

    #[test]
    fn test_dst_start_day_is_short() {
        let clock = BusinessClock::new(chrono_tz::America::New_York);
        let (start, end) = clock.day_bounds(date("2024-03-10"));
        assert_eq!(end - start, Duration::hours(23));
    }

    #[test]
    fn test_trailing_days_oldest_first() {
        let clock = BusinessClock::new(chrono_tz::UTC);
        let days = clock.trailing_days(date("2024-03-02"), 3);
        assert_eq!(days, vec![date("2024-02-29"), date("2024-03-01"), date("2024-03-02")]);
        assert!(clock.trailing_days(date("2024-03-02"), 0).is_empty());
    }
}
