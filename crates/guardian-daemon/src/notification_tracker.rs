//! Per-day notification dedup. One alert per (cause, subject) per local
//! calendar day; the seen-set rolls over lazily on the first check after
//! midnight, so no background timer is needed.

use std::collections::HashSet;

use chrono::NaiveDate;
use tracing::debug;

#[derive(Debug)]
pub struct NotificationTracker {
    day: Option<NaiveDate>,
    seen: HashSet<String>,
}

impl NotificationTracker {
    pub fn new() -> Self {
        Self { day: None, seen: HashSet::new() }
    }

    /// First call for (cause, subject) on `today` returns true and marks it
    /// seen; repeats the same day return false. A new `today` clears
    /// yesterday's state before the check.
    pub fn should_notify(&mut self, cause: &str, subject: &str, today: NaiveDate) -> bool {
        if self.day != Some(today) {
            if self.day.is_some() {
                debug!(%today, "notification dedup day rolled over");
            }
            self.day = Some(today);
            self.seen.clear();
        }
        self.seen.insert(format!("{}:{}", cause, subject))
    }

    /// Drops all session state. Called when the manager stops.
    pub fn reset(&mut self) {
        self.day = None;
        self.seen.clear();
    }
}

impl Default for NotificationTracker {
    fn default() -> Self {
        Self::new()
    }
}
