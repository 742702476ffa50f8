use serde::{Deserialize, Serialize};

/// Tuning knobs for the enforcement engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Packages exempt from blanket bedtime/focus/daily-quota blocks.
    ///
    /// Blocking any of these would cut off essential device functions, so the
    /// list errs on the side of inclusion: dialer and emergency calling,
    /// settings, the system UI, and the guardian app itself (a child locked
    /// out of the guardian app could never surface remaining-time state).
    #[serde(default = "default_allowlist")]
    pub allowlist: Vec<String>,

    /// Remaining-time threshold (seconds) below which a one-per-day warning
    /// notification is raised for a still-unblocked app.
    #[serde(default = "default_low_time_warning_secs")]
    pub low_time_warning_secs: u32,
}

fn default_allowlist() -> Vec<String> {
    [
        "com.android.dialer",
        "com.android.phone",
        "com.android.emergency",
        "com.android.settings",
        "com.android.systemui",
        "com.guardian.screentime",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_low_time_warning_secs() -> u32 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allowlist: default_allowlist(),
            low_time_warning_secs: default_low_time_warning_secs(),
        }
    }
}

impl EngineConfig {
    pub fn is_allowlisted(&self, package: &str) -> bool {
        self.allowlist.iter().any(|p| p == package)
    }
}
