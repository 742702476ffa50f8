//! Pure policy evaluation: policy rows + usage snapshot + "now" in,
//! block-decision set out. No I/O, no hidden state.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, Local};
use guardian_common::{
    AccessOverride, AppQuota, BlockDecision, BlockReason, PolicySnapshot, TimeWindowKind,
    TimeWindowRule, UsageSnapshot,
};
use tracing::{debug, warn};

/// Evaluate the full policy set at `now`.
///
/// Priority order, first match wins globally:
/// 1. an active bedtime window blocks everything outside `allowlist`;
/// 2. an active focus window, same blanket;
/// 3. total usage at or over the global daily limit, same blanket;
/// 4. otherwise per-app quotas, each suppressible by an active override.
///
/// Blanket reasons are mutually exclusive with per-app ones, so a package
/// never carries two reasons in one evaluation. Malformed rows are excluded
/// individually rather than failing the evaluation.
pub fn evaluate(
    policy: &PolicySnapshot,
    overrides: &[AccessOverride],
    usage: &UsageSnapshot,
    installed: &[String],
    allowlist: &[String],
    now: DateTime<Local>,
) -> BTreeSet<BlockDecision> {
    if let Some(kind) = active_window_kind(&policy.windows, now) {
        let reason = match kind {
            TimeWindowKind::Bedtime => BlockReason::Bedtime,
            TimeWindowKind::Focus => BlockReason::Focus,
        };
        debug!(reason = reason.cause(), "blanket window active");
        return blanket_block(installed, allowlist, reason);
    }

    if let Some(quota) = &policy.daily_quota {
        let total_used: u64 = usage.values().map(|&s| u64::from(s)).sum();
        let limit = u64::from(quota.effective_limit(now.weekday()));
        if total_used >= limit {
            debug!(total_used, limit, "daily quota exhausted");
            return blanket_block(installed, allowlist, BlockReason::DailyQuota);
        }
    }

    let mut decisions = BTreeSet::new();
    for quota in &policy.app_quotas {
        if let Err(e) = quota.validate() {
            warn!(error = %e, "skipping app quota row");
            continue;
        }
        if !quota.applies_on(now.weekday()) {
            continue;
        }
        // A zero-limit quota only bites once usage is actually observed;
        // a package absent from the snapshot stays unblocked.
        let used = match usage.get(&quota.package) {
            Some(&used) if used > 0 => used,
            _ => continue,
        };
        if used < quota.effective_limit(now.weekday()) {
            continue;
        }
        if overrides.iter().any(|o| o.package == quota.package && o.is_active(now)) {
            debug!(package = %quota.package, "quota block suppressed by override");
            continue;
        }
        decisions.insert(BlockDecision::new(quota.package.clone(), BlockReason::AppQuota));
    }
    decisions
}

/// Bedtime beats focus when both are active at once.
fn active_window_kind(windows: &[TimeWindowRule], now: DateTime<Local>) -> Option<TimeWindowKind> {
    let valid = windows.iter().filter(|w| match w.validate() {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "skipping time window row");
            false
        }
    });
    let mut focus_active = false;
    for window in valid {
        if window.is_active_at(now) {
            match window.kind {
                TimeWindowKind::Bedtime => return Some(TimeWindowKind::Bedtime),
                TimeWindowKind::Focus => focus_active = true,
            }
        }
    }
    focus_active.then_some(TimeWindowKind::Focus)
}

fn blanket_block(
    installed: &[String],
    allowlist: &[String],
    reason: BlockReason,
) -> BTreeSet<BlockDecision> {
    installed
        .iter()
        .filter(|pkg| !allowlist.iter().any(|a| a == *pkg))
        .map(|pkg| BlockDecision::new(pkg.clone(), reason))
        .collect()
}

/// Today's effective per-app limits, for the native remaining-time display.
/// Quotas that do not apply today are omitted.
pub fn effective_app_limits(policy: &PolicySnapshot, now: DateTime<Local>) -> HashMap<String, u32> {
    let today = now.weekday();
    policy
        .app_quotas
        .iter()
        .filter(|q| q.validate().is_ok() && q.applies_on(today))
        .map(|q| (q.package.clone(), q.effective_limit(today)))
        .collect()
}

/// Seconds left before `used` reaches `limit`.
pub fn remaining_secs(limit: u32, used: u32) -> u32 {
    limit.saturating_sub(used)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Weekday};
    use guardian_common::{DailyQuotaSettings, DaySet, OverrideStatus};

    use super::*;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap(),
            )
            .unwrap()
    }

    // 2024-05-07 is a Tuesday, 2024-05-04 a Saturday.
    fn tuesday_noon() -> DateTime<Local> {
        local(2024, 5, 7, 12, 0)
    }

    fn packages(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn window(kind: TimeWindowKind, days: &[Weekday], start: u32, end: u32) -> TimeWindowRule {
        TimeWindowRule { kind, days: days.iter().copied().collect(), start_secs: start, end_secs: end }
    }

    fn app_quota(package: &str, limit: u32, days: DaySet) -> AppQuota {
        AppQuota {
            package: package.to_string(),
            limit_secs: limit,
            days,
            bonus_enabled: false,
            bonus_secs: 0,
            bonus_streak_target: 0,
        }
    }

    #[test]
    fn test_bedtime_blanket_blocks_all_but_allowlist() {
        let policy = PolicySnapshot {
            windows: vec![window(TimeWindowKind::Bedtime, &[Weekday::Tue], 0, 0)],
            daily_quota: None,
            app_quotas: vec![app_quota("com.game", 0, DaySet::ALL)],
        };
        let installed = packages(&["com.game", "com.video", "com.android.dialer"]);
        let allowlist = packages(&["com.android.dialer"]);
        let usage = UsageSnapshot::from([("com.game".to_string(), 9999)]);

        let decisions = evaluate(&policy, &[], &usage, &installed, &allowlist, tuesday_noon());

        assert_eq!(decisions.len(), 2);
        assert!(decisions.iter().all(|d| d.reason == BlockReason::Bedtime));
        assert!(decisions.iter().any(|d| d.package == "com.game"));
        assert!(decisions.iter().any(|d| d.package == "com.video"));
        assert!(!decisions.iter().any(|d| d.package == "com.android.dialer"));
    }

    #[test]
    fn test_bedtime_wins_over_focus() {
        let policy = PolicySnapshot {
            windows: vec![
                window(TimeWindowKind::Focus, &[Weekday::Tue], 0, 0),
                window(TimeWindowKind::Bedtime, &[Weekday::Tue], 0, 0),
            ],
            ..Default::default()
        };
        let installed = packages(&["com.game"]);

        let decisions =
            evaluate(&policy, &[], &UsageSnapshot::new(), &installed, &[], tuesday_noon());

        assert!(decisions.iter().all(|d| d.reason == BlockReason::Bedtime));
    }

    #[test]
    fn test_focus_blanket_when_no_bedtime() {
        let policy = PolicySnapshot {
            windows: vec![window(TimeWindowKind::Focus, &[Weekday::Tue], 11 * 3600, 13 * 3600)],
            ..Default::default()
        };
        let installed = packages(&["com.game"]);

        let decisions =
            evaluate(&policy, &[], &UsageSnapshot::new(), &installed, &[], tuesday_noon());

        assert_eq!(decisions.len(), 1);
        assert!(decisions.iter().all(|d| d.reason == BlockReason::Focus));
    }

    #[test]
    fn test_weekend_bonus_applies_only_on_weekend() {
        let policy = PolicySnapshot {
            daily_quota: Some(DailyQuotaSettings { daily_limit_secs: 3600, weekend_bonus_secs: 1800 }),
            ..Default::default()
        };
        let installed = packages(&["com.game"]);
        let usage = UsageSnapshot::from([("com.game".to_string(), 4500)]);

        // Saturday: 4500 < 3600 + 1800, not blocked.
        let saturday = local(2024, 5, 4, 12, 0);
        assert!(evaluate(&policy, &[], &usage, &installed, &[], saturday).is_empty());

        // Tuesday: 4500 >= 3600, blanket block.
        let decisions = evaluate(&policy, &[], &usage, &installed, &[], tuesday_noon());
        assert!(decisions.iter().all(|d| d.reason == BlockReason::DailyQuota));
        assert_eq!(decisions.len(), 1);
    }

    #[test]
    fn test_daily_quota_sums_across_packages() {
        let policy = PolicySnapshot {
            daily_quota: Some(DailyQuotaSettings { daily_limit_secs: 3600, weekend_bonus_secs: 0 }),
            ..Default::default()
        };
        let installed = packages(&["com.a", "com.b"]);
        let usage =
            UsageSnapshot::from([("com.a".to_string(), 1800), ("com.b".to_string(), 1800)]);

        let decisions = evaluate(&policy, &[], &usage, &installed, &[], tuesday_noon());
        assert_eq!(decisions.len(), 2);
        assert!(decisions.iter().all(|d| d.reason == BlockReason::DailyQuota));
    }

    #[test]
    fn test_app_quota_blocks_at_limit() {
        let policy = PolicySnapshot {
            app_quotas: vec![app_quota(
                "com.game",
                1800,
                [Weekday::Sun, Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu]
                    .into_iter()
                    .collect(),
            )],
            ..Default::default()
        };
        let installed = packages(&["com.game", "com.other"]);
        let usage = UsageSnapshot::from([("com.game".to_string(), 1800)]);

        let decisions = evaluate(&policy, &[], &usage, &installed, &[], tuesday_noon());

        let expected: BTreeSet<_> =
            [BlockDecision::new("com.game", BlockReason::AppQuota)].into_iter().collect();
        assert_eq!(decisions, expected);
    }

    #[test]
    fn test_app_quota_skipped_on_non_applicable_day() {
        // Quota applies Sun..Thu only; Saturday usage over the limit is fine.
        let policy = PolicySnapshot {
            app_quotas: vec![app_quota(
                "com.game",
                1800,
                [Weekday::Sun, Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu]
                    .into_iter()
                    .collect(),
            )],
            ..Default::default()
        };
        let installed = packages(&["com.game"]);
        let usage = UsageSnapshot::from([("com.game".to_string(), 7200)]);

        let saturday = local(2024, 5, 4, 12, 0);
        assert!(evaluate(&policy, &[], &usage, &installed, &[], saturday).is_empty());
    }

    #[test]
    fn test_active_override_suppresses_app_quota_only() {
        let now = tuesday_noon();
        let policy = PolicySnapshot {
            app_quotas: vec![app_quota("com.game", 1800, DaySet::ALL)],
            ..Default::default()
        };
        let installed = packages(&["com.game"]);
        let usage = UsageSnapshot::from([("com.game".to_string(), 1800)]);
        let overrides = vec![AccessOverride {
            package: "com.game".to_string(),
            expires_at: now + chrono::Duration::seconds(600),
            status: OverrideStatus::Active,
        }];

        assert!(evaluate(&policy, &overrides, &usage, &installed, &[], now).is_empty());

        // The same override does not touch a blanket bedtime block.
        let bedtime_policy = PolicySnapshot {
            windows: vec![window(TimeWindowKind::Bedtime, &[Weekday::Tue], 0, 0)],
            app_quotas: policy.app_quotas.clone(),
            daily_quota: None,
        };
        let decisions = evaluate(&bedtime_policy, &overrides, &usage, &installed, &[], now);
        assert_eq!(decisions.len(), 1);
        assert!(decisions.iter().all(|d| d.reason == BlockReason::Bedtime));
    }

    #[test]
    fn test_expired_or_revoked_override_does_not_suppress() {
        let now = tuesday_noon();
        let policy = PolicySnapshot {
            app_quotas: vec![app_quota("com.game", 1800, DaySet::ALL)],
            ..Default::default()
        };
        let installed = packages(&["com.game"]);
        let usage = UsageSnapshot::from([("com.game".to_string(), 1800)]);

        let expired = vec![AccessOverride {
            package: "com.game".to_string(),
            expires_at: now - chrono::Duration::seconds(1),
            status: OverrideStatus::Active,
        }];
        assert_eq!(evaluate(&policy, &expired, &usage, &installed, &[], now).len(), 1);

        let revoked = vec![AccessOverride {
            package: "com.game".to_string(),
            expires_at: now + chrono::Duration::seconds(600),
            status: OverrideStatus::Revoked,
        }];
        assert_eq!(evaluate(&policy, &revoked, &usage, &installed, &[], now).len(), 1);
    }

    #[test]
    fn test_zero_limit_quota_needs_observed_usage() {
        let policy = PolicySnapshot {
            app_quotas: vec![app_quota("com.game", 0, DaySet::ALL)],
            ..Default::default()
        };
        let installed = packages(&["com.game"]);

        // No usage row yet: unblocked.
        assert!(
            evaluate(&policy, &[], &UsageSnapshot::new(), &installed, &[], tuesday_noon())
                .is_empty()
        );

        // Recorded zero is still "no usage observed".
        let zero = UsageSnapshot::from([("com.game".to_string(), 0)]);
        assert!(evaluate(&policy, &[], &zero, &installed, &[], tuesday_noon()).is_empty());

        // One observed second trips a zero limit.
        let one = UsageSnapshot::from([("com.game".to_string(), 1)]);
        assert_eq!(evaluate(&policy, &[], &one, &installed, &[], tuesday_noon()).len(), 1);
    }

    #[test]
    fn test_package_without_quota_row_never_app_blocked() {
        let policy = PolicySnapshot {
            app_quotas: vec![app_quota("com.game", 10, DaySet::ALL)],
            ..Default::default()
        };
        let installed = packages(&["com.game", "com.unquoted"]);
        let usage = UsageSnapshot::from([
            ("com.game".to_string(), 100),
            ("com.unquoted".to_string(), 999_999),
        ]);

        let decisions = evaluate(&policy, &[], &usage, &installed, &[], tuesday_noon());
        assert_eq!(decisions.len(), 1);
        assert!(decisions.iter().all(|d| d.package == "com.game"));
    }

    #[test]
    fn test_invalid_rows_are_skipped_not_fatal() {
        let policy = PolicySnapshot {
            windows: vec![
                // Bad bounds: excluded rather than failing the evaluation.
                window(TimeWindowKind::Bedtime, &[Weekday::Tue], 90_000, 100_000),
            ],
            app_quotas: vec![
                app_quota("", 0, DaySet::ALL),
                app_quota("com.game", 10, DaySet::ALL),
            ],
            daily_quota: None,
        };
        let installed = packages(&["com.game"]);
        let usage = UsageSnapshot::from([("com.game".to_string(), 100)]);

        let decisions = evaluate(&policy, &[], &usage, &installed, &[], tuesday_noon());
        assert_eq!(decisions.len(), 1);
        assert!(decisions.iter().all(|d| d.reason == BlockReason::AppQuota));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let policy = PolicySnapshot {
            daily_quota: Some(DailyQuotaSettings { daily_limit_secs: 10, weekend_bonus_secs: 0 }),
            ..Default::default()
        };
        let installed = packages(&["com.b", "com.a", "com.c"]);
        let usage = UsageSnapshot::from([("com.a".to_string(), 20)]);

        let first = evaluate(&policy, &[], &usage, &installed, &[], tuesday_noon());
        let second = evaluate(&policy, &[], &usage, &installed, &[], tuesday_noon());
        assert_eq!(first, second);
    }

    #[test]
    fn test_effective_app_limits_today_only() {
        let now = tuesday_noon();
        let mut bonus_quota = app_quota("com.game", 1800, DaySet::ALL);
        bonus_quota.bonus_enabled = true;
        bonus_quota.bonus_secs = 600;

        let policy = PolicySnapshot {
            app_quotas: vec![
                bonus_quota,
                app_quota("com.weekend", 3600, DaySet::WEEKEND),
            ],
            ..Default::default()
        };

        let limits = effective_app_limits(&policy, now);
        assert_eq!(limits.get("com.game"), Some(&2400));
        assert!(!limits.contains_key("com.weekend"));
    }

    #[test]
    fn test_remaining_secs_saturates() {
        assert_eq!(remaining_secs(1800, 1700), 100);
        assert_eq!(remaining_secs(1800, 2000), 0);
    }
}
