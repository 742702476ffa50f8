// Recurring time-window predicate.
//
// A window is anchored to the weekday it starts on: an overnight window
// (end <= start) stays active past midnight into a day that may not itself
// be in `days`.

use chrono::{DateTime, Datelike, Local, Timelike};

use crate::error::{Error, Result};
use crate::types::{DaySet, TimeWindowRule};

pub const SECS_PER_DAY: u32 = 86_400;

/// Seconds elapsed since local midnight at `t`.
pub fn seconds_of_day(t: DateTime<Local>) -> u32 {
    t.time().num_seconds_from_midnight()
}

impl TimeWindowRule {
    /// True when the window wraps past midnight. `start == end` is treated
    /// as wrapping and covers the full 24 hours of the anchor day.
    pub fn crosses_midnight(&self) -> bool {
        self.end_secs <= self.start_secs
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_secs >= SECS_PER_DAY || self.end_secs >= SECS_PER_DAY {
            return Err(Error::InvalidRule(format!(
                "window bounds out of range: start={} end={}",
                self.start_secs, self.end_secs
            )));
        }
        Ok(())
    }

    /// Is this window active at instant `now`?
    ///
    /// The time-of-day test is half-open, `[start, end)`. For a wrapped
    /// window the portion before midnight is anchored to today's weekday and
    /// the portion after midnight to yesterday's.
    pub fn is_active_at(&self, now: DateTime<Local>) -> bool {
        let tod = seconds_of_day(now);
        let today = now.weekday();

        if !self.crosses_midnight() {
            return self.days.contains(today) && tod >= self.start_secs && tod < self.end_secs;
        }

        if self.days.contains(today) && tod >= self.start_secs {
            return true;
        }
        let yesterday = today.pred();
        self.days.contains(yesterday) && tod < self.end_secs
    }

    /// Days on which this window's *end* transition occurs. For a wrapped
    /// window that is the day after each anchor day.
    pub fn end_days(&self) -> DaySet {
        if self.crosses_midnight() {
            self.days.rotate_forward()
        } else {
            self.days
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Weekday};

    use super::*;
    use crate::types::TimeWindowKind;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap(),
            )
            .unwrap()
    }

    fn window(days: &[Weekday], start: u32, end: u32) -> TimeWindowRule {
        TimeWindowRule {
            kind: TimeWindowKind::Bedtime,
            days: days.iter().copied().collect(),
            start_secs: start,
            end_secs: end,
        }
    }

    #[test]
    fn test_plain_window_half_open() {
        // 15:00-19:00 on Mondays. 2024-05-06 is a Monday.
        let w = window(&[Weekday::Mon], 15 * 3600, 19 * 3600);
        assert!(w.is_active_at(local(2024, 5, 6, 15, 0)));
        assert!(w.is_active_at(local(2024, 5, 6, 18, 59)));
        assert!(!w.is_active_at(local(2024, 5, 6, 19, 0)));
        assert!(!w.is_active_at(local(2024, 5, 6, 14, 59)));
        // Same clock time on a Tuesday: not an anchor day.
        assert!(!w.is_active_at(local(2024, 5, 7, 16, 0)));
    }

    #[test]
    fn test_overnight_wrap_anchor_day() {
        // 23:00 Friday through 07:00 Saturday. 2024-05-03 is a Friday.
        let w = window(&[Weekday::Fri], 23 * 3600, 7 * 3600);
        assert!(w.is_active_at(local(2024, 5, 3, 23, 30)));
        assert!(w.is_active_at(local(2024, 5, 4, 1, 0)));
        assert!(w.is_active_at(local(2024, 5, 4, 6, 59)));
        assert!(!w.is_active_at(local(2024, 5, 4, 8, 0)));
        // Saturday 23:30 belongs to a Saturday-anchored window, not this one.
        assert!(!w.is_active_at(local(2024, 5, 4, 23, 30)));
        // Friday early morning is the tail of a Thursday anchor.
        assert!(!w.is_active_at(local(2024, 5, 3, 1, 0)));
    }

    #[test]
    fn test_start_equals_end_covers_full_day() {
        let w = window(&[Weekday::Wed], 9 * 3600, 9 * 3600);
        // 2024-05-01 is a Wednesday.
        assert!(w.is_active_at(local(2024, 5, 1, 9, 0)));
        assert!(w.is_active_at(local(2024, 5, 1, 23, 59)));
        // Spills into Thursday until 09:00.
        assert!(w.is_active_at(local(2024, 5, 2, 8, 59)));
        assert!(!w.is_active_at(local(2024, 5, 2, 9, 0)));
        // Wednesday before 09:00 is the tail of a Tuesday anchor.
        assert!(!w.is_active_at(local(2024, 5, 1, 8, 0)));
    }

    #[test]
    fn test_empty_days_never_active() {
        let w = window(&[], 0, 0);
        assert!(!w.is_active_at(local(2024, 5, 1, 12, 0)));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let w = window(&[Weekday::Mon], SECS_PER_DAY, 0);
        assert!(w.validate().is_err());
        let w = window(&[Weekday::Mon], 0, SECS_PER_DAY);
        assert!(w.validate().is_err());
        let w = window(&[Weekday::Mon], 0, SECS_PER_DAY - 1);
        assert!(w.validate().is_ok());
    }

    #[test]
    fn test_end_days_shift_for_wrapped_windows() {
        let wrapped = window(&[Weekday::Fri], 23 * 3600, 7 * 3600);
        assert!(wrapped.end_days().contains(Weekday::Sat));
        assert!(!wrapped.end_days().contains(Weekday::Fri));

        let plain = window(&[Weekday::Fri], 7 * 3600, 23 * 3600);
        assert!(plain.end_days().contains(Weekday::Fri));
    }
}
