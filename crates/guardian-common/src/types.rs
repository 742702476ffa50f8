use std::collections::HashMap;

use chrono::{DateTime, Local, Weekday};
use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Index of a weekday with Sunday = 0, matching the day numbering used by
/// guardian policy rows.
pub fn day_index(day: Weekday) -> u8 {
    day.num_days_from_sunday() as u8
}

/// Set of weekdays stored as a 7-bit mask (bit 0 = Sunday .. bit 6 = Saturday).
///
/// Policy rows carry per-day applicability; a mask keeps the "applies today"
/// check a single bit test and makes the empty set (never applies) explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DaySet(u8);

impl DaySet {
    pub const ALL: DaySet = DaySet(0b0111_1111);
    pub const WEEKEND: DaySet = DaySet(0b0100_0001);

    pub fn empty() -> Self {
        DaySet(0)
    }

    pub fn from_bits(bits: u8) -> Self {
        DaySet(bits & 0b0111_1111)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & (1 << day_index(day)) != 0
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day_index(day);
    }

    /// Shifts every member one day forward (Sunday -> Monday, Saturday ->
    /// Sunday). Used for the end transition of windows that cross midnight,
    /// which fires on the day after the anchor day.
    pub fn rotate_forward(self) -> Self {
        let shifted = (self.0 << 1) & 0b0111_1111;
        let wrapped = (self.0 >> 6) & 1;
        DaySet(shifted | wrapped)
    }

    pub fn iter_indices(self) -> impl Iterator<Item = u8> {
        (0..7u8).filter(move |i| self.0 & (1 << i) != 0)
    }
}

impl FromIterator<Weekday> for DaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = DaySet::empty();
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl Serialize for DaySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let indices: Vec<u8> = self.iter_indices().collect();
        let mut seq = serializer.serialize_seq(Some(indices.len()))?;
        for i in indices {
            seq.serialize_element(&i)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for DaySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DaySetVisitor;

        impl<'de> Visitor<'de> for DaySetVisitor {
            type Value = DaySet;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a sequence of weekday indices 0..=6 (0 = Sunday)")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<DaySet, A::Error> {
                let mut bits = 0u8;
                while let Some(i) = seq.next_element::<u8>()? {
                    if i > 6 {
                        return Err(serde::de::Error::custom(format!(
                            "weekday index out of range: {}",
                            i
                        )));
                    }
                    bits |= 1 << i;
                }
                Ok(DaySet(bits))
            }
        }

        deserializer.deserialize_seq(DaySetVisitor)
    }
}

/// What a recurring time window means when it is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindowKind {
    /// Nightly lights-out: blanket block of everything outside the allowlist.
    Bedtime,
    /// Homework / focus session: same blanket block, softer messaging.
    Focus,
}

/// A recurring daily time window during which all use is blocked.
///
/// `start_secs`/`end_secs` are seconds of local day (0..86_399). When
/// `end_secs <= start_secs` the window crosses midnight and runs from
/// `start_secs` on the anchor day through `end_secs` on the following day;
/// `start_secs == end_secs` covers the full 24 hours of the anchor day.
/// `days` names the anchor days only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindowRule {
    pub kind: TimeWindowKind,
    pub days: DaySet,
    pub start_secs: u32,
    pub end_secs: u32,
}

/// Global daily screen-time budget for a child, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyQuotaSettings {
    pub daily_limit_secs: u32,
    pub weekend_bonus_secs: u32,
}

impl DailyQuotaSettings {
    /// Limit applicable on `day`: the weekend bonus counts only on Saturday
    /// and Sunday, device-local.
    pub fn effective_limit(&self, day: Weekday) -> u32 {
        if DaySet::WEEKEND.contains(day) {
            self.daily_limit_secs + self.weekend_bonus_secs
        } else {
            self.daily_limit_secs
        }
    }
}

/// Per-application daily quota. One row per (child, package).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppQuota {
    pub package: String,
    pub limit_secs: u32,
    pub days: DaySet,
    #[serde(default)]
    pub bonus_enabled: bool,
    #[serde(default)]
    pub bonus_secs: u32,
    #[serde(default)]
    pub bonus_streak_target: u32,
}

impl AppQuota {
    pub fn applies_on(&self, day: Weekday) -> bool {
        self.days.contains(day)
    }

    /// Limit applicable on `day`, including the streak bonus when enabled.
    pub fn effective_limit(&self, day: Weekday) -> u32 {
        if self.bonus_enabled && self.applies_on(day) {
            self.limit_secs + self.bonus_secs
        } else {
            self.limit_secs
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.package.is_empty() {
            return Err(Error::InvalidRule("app quota with empty package name".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideStatus {
    Active,
    Revoked,
}

/// A guardian-granted, time-bounded pass suppressing one per-app quota block.
///
/// Overrides never suppress bedtime, focus, or global daily-quota blocks;
/// those reflect an intent to stop all use. History is append-only at the
/// data layer; the engine only cares about current validity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessOverride {
    pub package: String,
    pub expires_at: DateTime<Local>,
    pub status: OverrideStatus,
}

impl AccessOverride {
    pub fn is_active(&self, now: DateTime<Local>) -> bool {
        self.status == OverrideStatus::Active && self.expires_at > now
    }
}

/// Seconds of use recorded today per package, as of "now". Never historical.
pub type UsageSnapshot = HashMap<String, u32>;

/// Why a package is blocked. Reasons are mutually exclusive per package per
/// evaluation; the blanket reasons (everything but `AppQuota`) win globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Bedtime,
    Focus,
    DailyQuota,
    AppQuota,
}

impl BlockReason {
    /// Stable identifier used for notification dedup keys and log fields.
    pub fn cause(&self) -> &'static str {
        match self {
            BlockReason::Bedtime => "bedtime",
            BlockReason::Focus => "focus",
            BlockReason::DailyQuota => "daily_limit",
            BlockReason::AppQuota => "app_limit",
        }
    }
}

/// The engine's sole output: one package to block, with the winning reason.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockDecision {
    pub package: String,
    pub reason: BlockReason,
}

impl BlockDecision {
    pub fn new(package: impl Into<String>, reason: BlockReason) -> Self {
        Self { package: package.into(), reason }
    }
}

/// Everything a policy fetch returns for one child.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySnapshot {
    #[serde(default)]
    pub windows: Vec<TimeWindowRule>,
    #[serde(default)]
    pub daily_quota: Option<DailyQuotaSettings>,
    #[serde(default)]
    pub app_quotas: Vec<AppQuota>,
}
