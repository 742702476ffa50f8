//! Transition scheduling: turns the recurring window rules into the single
//! soonest future instant at which any window flips state, so the manager
//! can sleep on one alarm instead of polling.

use chrono::{DateTime, Datelike, Duration, Local, NaiveTime, TimeZone};
use guardian_common::{DaySet, TimeWindowRule};
use tracing::warn;

/// Soonest strictly-future instant after `after` whose local clock reads
/// `time_of_day_secs` on a weekday in `days`. Scans today plus the next seven
/// days; `None` when `days` is empty or every candidate falls into a DST gap.
pub fn next_occurrence(
    time_of_day_secs: u32,
    days: DaySet,
    after: DateTime<Local>,
) -> Option<DateTime<Local>> {
    if days.is_empty() {
        return None;
    }
    let time = NaiveTime::from_num_seconds_from_midnight_opt(time_of_day_secs, 0)?;

    for offset in 0..=7 {
        let date = after.date_naive() + Duration::days(offset);
        if !days.contains(date.weekday()) {
            continue;
        }
        // A DST gap can swallow the wall-clock instant; skip to the next day.
        let Some(candidate) = Local.from_local_datetime(&date.and_time(time)).earliest() else {
            warn!(%date, time_of_day_secs, "wall-clock instant does not exist locally, skipping");
            continue;
        };
        if candidate > after {
            return Some(candidate);
        }
    }
    None
}

/// Next instant at which any of `windows` starts or ends. The end of a
/// midnight-crossing window fires on the day after its anchor day, which
/// `TimeWindowRule::end_days` accounts for.
pub fn next_transition(windows: &[TimeWindowRule], now: DateTime<Local>) -> Option<DateTime<Local>> {
    windows
        .iter()
        .filter(|w| w.validate().is_ok())
        .flat_map(|w| {
            [
                next_occurrence(w.start_secs, w.days, now),
                next_occurrence(w.end_secs, w.end_days(), now),
            ]
        })
        .flatten()
        .min()
}
