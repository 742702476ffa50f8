//! The native enforcement surface: where decisions, limits, wakes, and user
//! alerts land. The daemon binary ships a dry-run implementation that logs
//! pushes and raises desktop notifications; the real blocking primitive
//! lives outside this engine.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use guardian_common::{BlockDecision, Result};
use notify_rust::{Notification, Urgency};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::enforcement_manager::Trigger;

#[async_trait]
pub trait EnforcementSurface: Send + Sync {
    /// Replaces the enforced block list wholesale. Later pushes fully
    /// supersede earlier ones.
    async fn push_block_decisions(&self, decisions: &[BlockDecision]) -> Result<()>;

    /// Today's effective per-app limits, so the surface can show live
    /// remaining time without re-invoking the engine.
    async fn push_app_limits(&self, limits: &HashMap<String, u32>) -> Result<()>;

    /// Arms a one-shot wake at `at`, replacing any pending wake.
    async fn schedule_wake(&self, at: DateTime<Local>) -> Result<()>;

    async fn cancel_scheduled_wakes(&self) -> Result<()>;

    /// User-facing alert. Only called after the dedup tracker approves.
    async fn notify(&self, cause: &str, subject: &str) -> Result<()>;

    /// Capability probes. Either being false means "skip this cycle's push,
    /// still reschedule" rather than an error.
    fn is_available(&self) -> bool;
    fn is_permission_granted(&self) -> bool;
}

/// Logging surface for the daemon binary and for local runs without a real
/// blocking backend. Wakes are tokio timers feeding the manager's trigger
/// channel; alerts go out as desktop notifications.
pub struct DryRunSurface {
    trigger_tx: mpsc::UnboundedSender<Trigger>,
    wake_task: Mutex<Option<JoinHandle<()>>>,
    desktop_notifications: bool,
}

impl DryRunSurface {
    pub fn new(trigger_tx: mpsc::UnboundedSender<Trigger>) -> Self {
        Self { trigger_tx, wake_task: Mutex::new(None), desktop_notifications: true }
    }

    /// Keeps alerts in the log only. Used by tests and headless runs.
    pub fn without_desktop_notifications(mut self) -> Self {
        self.desktop_notifications = false;
        self
    }

    fn notification_text(cause: &str, subject: &str) -> (String, String) {
        match cause {
            "daily_limit" => (
                "Screen time is up".to_string(),
                "Today's screen-time limit has been reached.".to_string(),
            ),
            "app_limit" => (
                "App time is up".to_string(),
                format!("Today's time limit for {} has been reached.", subject),
            ),
            "app_limit_warning" => (
                "App time running low".to_string(),
                format!("Only a few minutes left for {} today.", subject),
            ),
            other => (other.to_string(), subject.to_string()),
        }
    }
}

#[async_trait]
impl EnforcementSurface for DryRunSurface {
    async fn push_block_decisions(&self, decisions: &[BlockDecision]) -> Result<()> {
        info!(count = decisions.len(), "pushing block decisions (dry run)");
        for decision in decisions {
            debug!(package = %decision.package, reason = decision.reason.cause(), "blocked");
        }
        Ok(())
    }

    async fn push_app_limits(&self, limits: &HashMap<String, u32>) -> Result<()> {
        info!(count = limits.len(), "pushing per-app limits (dry run)");
        Ok(())
    }

    async fn schedule_wake(&self, at: DateTime<Local>) -> Result<()> {
        let delay = (at - Local::now()).to_std().unwrap_or_default();
        let tx = self.trigger_tx.clone();

        let mut task = self.wake_task.lock().await;
        if let Some(previous) = task.take() {
            previous.abort();
        }
        info!(at = %at, delay_secs = delay.as_secs(), "arming transition wake");
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the manager stopped; nothing to wake.
            let _ = tx.send(Trigger::ScheduledWake);
        }));
        Ok(())
    }

    async fn cancel_scheduled_wakes(&self) -> Result<()> {
        if let Some(task) = self.wake_task.lock().await.take() {
            task.abort();
            debug!("cancelled pending wake");
        }
        Ok(())
    }

    async fn notify(&self, cause: &str, subject: &str) -> Result<()> {
        let (title, body) = Self::notification_text(cause, subject);
        info!(cause, subject, "user notification: {}", title);

        if self.desktop_notifications {
            let result = Notification::new()
                .appname("Guardian")
                .summary(&title)
                .body(&body)
                .urgency(Urgency::Normal)
                .show();
            if let Err(e) = result {
                warn!("failed to show desktop notification: {}", e);
            }
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn is_permission_granted(&self) -> bool {
        true
    }
}
