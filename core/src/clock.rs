use std::sync::Mutex;

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};

/// Source of local wall-clock time. Injected so that "today" is deterministic in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    #[must_use]
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Midday on `date`.
    #[must_use]
    pub fn on(date: NaiveDate) -> Self {
        Self::new(date.and_hms_opt(12, 0, 0).unwrap_or_default())
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_today_and_advance() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let clock = FixedClock::on(date);
        assert_eq!(clock.today(), date);

        clock.advance(Duration::hours(13));
        assert_eq!(clock.today(), date + Duration::days(1));
    }
}
