//! Date windows and the narrowing ladder
//!
//! When the backend cannot compute a window it answers with a range error.
//! The client then retries the same request over shorter windows ending at
//! the same instant (full, 30 days, 7 days). Results record which window
//! was actually served.

use chrono::{DateTime, Datelike, Duration, Utc};

use crate::error::{Error, Result};

/// Fallback windows in days, widest first.
pub const FALLBACK_WINDOWS_DAYS: [i64; 2] = [30, 7];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if from >= to {
            return Err(Error::Api(format!("empty date range {from} .. {to}")));
        }
        Ok(Self { from, to })
    }

    /// 365 days before the first of `now`'s month until `now`.
    pub fn default_until(now: DateTime<Utc>) -> Self {
        let first_of_month = now.with_day(1).unwrap_or(now);
        Self {
            from: first_of_month - Duration::days(365),
            to: now,
        }
    }

    /// The last `days` days before `self.to`.
    pub fn last_days(&self, days: i64) -> Self {
        Self {
            from: self.to - Duration::days(days),
            to: self.to,
        }
    }

    pub fn duration(&self) -> Duration {
        self.to - self.from
    }

    /// This range followed by every fallback window shorter than it.
    pub fn ladder(&self) -> Vec<DateRange> {
        let mut steps = vec![*self];
        for days in FALLBACK_WINDOWS_DAYS {
            if Duration::days(days) < self.duration() {
                steps.push(self.last_days(days));
            }
        }
        steps
    }
}

/// Data together with the window it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct Served<T> {
    pub data: T,
    pub requested: DateRange,
    pub served: DateRange,
}

impl<T> Served<T> {
    pub fn is_narrowed(&self) -> bool {
        self.served != self.requested
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Served<U> {
        Served {
            data: f(self.data),
            requested: self.requested,
            served: self.served,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn default_range_starts_a_year_before_month_start() {
        let range = DateRange::default_until(at(2024, 6, 17));
        assert_eq!(range.from, at(2023, 6, 2));
        assert_eq!(range.to, at(2024, 6, 17));
    }

    #[test]
    fn ladder_narrows_to_thirty_then_seven_days() {
        let full = DateRange::new(at(2024, 1, 1), at(2024, 6, 1)).unwrap();
        let ladder = full.ladder();
        assert_eq!(ladder.len(), 3);
        assert_eq!(ladder[0], full);
        assert_eq!(ladder[1].duration(), Duration::days(30));
        assert_eq!(ladder[2].duration(), Duration::days(7));
        assert!(ladder.iter().all(|r| r.to == full.to));
    }

    #[test]
    fn short_ranges_skip_wider_fallbacks() {
        let range = DateRange::new(at(2024, 6, 1), at(2024, 6, 11)).unwrap();
        let ladder = range.ladder();
        assert_eq!(ladder.len(), 2);
        assert_eq!(ladder[1].duration(), Duration::days(7));

        let tiny = DateRange::new(at(2024, 6, 1), at(2024, 6, 3)).unwrap();
        assert_eq!(tiny.ladder(), vec![tiny]);
    }

    #[test]
    fn empty_range_is_rejected() {
        assert!(DateRange::new(at(2024, 6, 1), at(2024, 6, 1)).is_err());
    }

    #[test]
    fn served_reports_narrowing() {
        let full = DateRange::new(at(2024, 1, 1), at(2024, 6, 1)).unwrap();
        let exact = Served { data: 1, requested: full, served: full };
        assert!(!exact.is_narrowed());

        let narrowed = Served { data: 1, requested: full, served: full.last_days(7) };
        assert!(narrowed.map(|n| n + 1).is_narrowed());
    }
}
