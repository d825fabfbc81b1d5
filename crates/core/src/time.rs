use chrono::{DateTime, Duration, Utc};

/// A simple clock abstraction for deterministic time in services and tests.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    Default,
    Fixed(DateTime<Utc>),
}

impl Clock {
    /// Returns a clock that uses the current system time.
    #[must_use]
    pub fn default_clock() -> Self {
        Self::Default
    }

    /// Returns a clock fixed at the given timestamp.
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    /// Returns the current time according to the clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::Default => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }

    /// If this is a fixed clock, advance it by the given duration.
    ///
    /// Has no effect on `Clock::Default`.
    pub fn advance(&mut self, delta: Duration) {
        if let Clock::Fixed(t) = self {
            *t += delta;
        }
    }

    /// Returns true if this clock represents real time.
    #[must_use]
    pub fn is_default(&self) -> bool {
        matches!(self, Clock::Default)
    }

    /// Returns true if this clock is fixed.
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Clock::Fixed(_))
    }
}

/// Returns true when both timestamps fall on the same UTC calendar date.
///
/// Streak upkeep and the daily-challenge gate compare calendar dates, not
/// 24-hour windows: 23:59 and 00:01 the next day are different days even
/// though they are two minutes apart.
#[must_use]
pub fn same_calendar_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive()
}

/// Whole calendar days from `earlier` to `later`, ignoring time of day.
///
/// Negative when `later` falls on an earlier date.
#[must_use]
pub fn calendar_days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    later
        .date_naive()
        .signed_duration_since(earlier.date_naive())
        .num_days()
}

/// Deterministic timestamp for tests and examples (2023-11-14T22:13:20Z).
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// Returns a deterministic `DateTime<Utc>` for tests and doc examples.
///
/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXED_TEST_TIMESTAMP, 0)
        .expect("fixed timestamp should be valid")
}

/// Returns a `Clock` fixed at the deterministic test timestamp.
#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_returns_fixed_time() {
        let clock = fixed_clock();
        assert!(clock.is_fixed());
        assert_eq!(clock.now(), fixed_now());
    }

    #[test]
    fn advance_moves_fixed_clock_only() {
        let mut clock = fixed_clock();
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), fixed_now() + Duration::hours(2));

        let mut system = Clock::default_clock();
        system.advance(Duration::hours(2));
        assert!(system.is_default());
    }

    #[test]
    fn same_calendar_day_ignores_time_of_day() {
        let morning = fixed_now() - Duration::hours(22);
        assert!(same_calendar_day(morning, fixed_now()));
    }

    #[test]
    fn midnight_crossing_is_a_new_day() {
        // 22:13 UTC, so two hours later lands on the next date.
        let late = fixed_now() + Duration::hours(2);
        assert!(!same_calendar_day(fixed_now(), late));
        assert_eq!(calendar_days_between(fixed_now(), late), 1);
    }

    #[test]
    fn calendar_days_between_counts_dates_not_durations() {
        let three_days = fixed_now() + Duration::days(3);
        assert_eq!(calendar_days_between(fixed_now(), three_days), 3);
        assert_eq!(calendar_days_between(three_days, fixed_now()), -3);
        assert_eq!(calendar_days_between(fixed_now(), fixed_now()), 0);
    }
}
