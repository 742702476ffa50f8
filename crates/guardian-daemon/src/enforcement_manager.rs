//! The orchestrator: reacts to triggers, runs single-flight evaluation
//! cycles, diffs decisions, drives notifications, reschedules transition
//! wakes, and pushes the result to the enforcement surface.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use guardian_common::config::EngineConfig;
use guardian_common::{BlockDecision, BlockReason, Result};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::notification_tracker::NotificationTracker;
use crate::policy_engine::{effective_app_limits, evaluate, remaining_secs};
use crate::scheduler::next_transition;
use crate::sources::{PolicyStore, UsageSource};
use crate::surface::EnforcementSurface;

/// Events that start an evaluation cycle. Triggers arriving while a cycle is
/// in flight are dropped: data is re-fetched fresh each cycle, so the cycle
/// already underway serves the dropped trigger too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// An app moved to the foreground on the child's device.
    AppForeground,
    /// Policy rows changed (rules saved, override granted or revoked).
    ConstraintsChanged,
    /// A previously armed window-transition wake fired.
    ScheduledWake,
    /// Guardian-initiated manual sync.
    ManualSync,
}

#[derive(Debug, Default)]
struct ManagerState {
    child: Option<Uuid>,
    last_decisions: BTreeSet<BlockDecision>,
    scheduled_wake: Option<DateTime<Local>>,
}

/// One manager per child session, explicitly constructed and owned by the
/// session lifecycle. All mutable state is private to the instance.
pub struct EnforcementManager {
    store: Arc<dyn PolicyStore>,
    usage: Arc<dyn UsageSource>,
    surface: Arc<dyn EnforcementSurface>,
    config: EngineConfig,
    evaluating: AtomicBool,
    // Watch channel rather than a plain bool so the trigger loop can observe
    // stop() even while parked on an empty trigger channel.
    running_tx: watch::Sender<bool>,
    state: Mutex<ManagerState>,
    tracker: Mutex<NotificationTracker>,
}

impl EnforcementManager {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        usage: Arc<dyn UsageSource>,
        surface: Arc<dyn EnforcementSurface>,
        config: EngineConfig,
    ) -> Self {
        let (running_tx, _) = watch::channel(false);
        Self {
            store,
            usage,
            surface,
            config,
            evaluating: AtomicBool::new(false),
            running_tx,
            state: Mutex::new(ManagerState::default()),
            tracker: Mutex::new(NotificationTracker::new()),
        }
    }

    /// Stopped -> Idle. Runs one immediate evaluation so enforcement is
    /// current before the first trigger arrives.
    pub async fn start(&self, child: Uuid) {
        {
            let mut state = self.state.lock().await;
            if *self.running_tx.borrow() {
                warn!(%child, "manager already started");
                return;
            }
            state.child = Some(child);
            state.last_decisions.clear();
            state.scheduled_wake = None;
            self.running_tx.send_replace(true);
        }
        info!(%child, "enforcement manager started");
        self.run_cycle().await;
    }

    /// Cancels pending wakes, clears session state, and ends the trigger
    /// loop. An evaluation already in flight is allowed to finish and push
    /// its final decisions, but it no longer rearms wakes or records state.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().await;
            if !*self.running_tx.borrow() {
                return;
            }
            self.running_tx.send_replace(false);
            state.child = None;
            state.scheduled_wake = None;
            state.last_decisions.clear();
        }
        if let Err(e) = self.surface.cancel_scheduled_wakes().await {
            warn!("failed to cancel scheduled wakes: {}", e);
        }
        self.tracker.lock().await.reset();
        info!("enforcement manager stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running_tx.borrow()
    }

    pub async fn last_decisions(&self) -> BTreeSet<BlockDecision> {
        self.state.lock().await.last_decisions.clone()
    }

    pub async fn scheduled_wake(&self) -> Option<DateTime<Local>> {
        self.state.lock().await.scheduled_wake
    }

    /// Consumes triggers until the channel closes or the manager stops.
    /// Senders may outlive the session (the surface holds one), so stop()
    /// must end the loop on its own rather than waiting for channel close.
    pub async fn run(&self, mut triggers: mpsc::UnboundedReceiver<Trigger>) {
        let mut running = self.running_tx.subscribe();
        loop {
            if !*running.borrow_and_update() {
                break;
            }
            tokio::select! {
                changed = running.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                trigger = triggers.recv() => {
                    match trigger {
                        Some(trigger) => self.handle_trigger(trigger).await,
                        None => break,
                    }
                }
            }
        }
        debug!("trigger loop ended");
    }

    pub async fn handle_trigger(&self, trigger: Trigger) {
        if !self.is_running().await {
            debug!(?trigger, "manager stopped, ignoring trigger");
            return;
        }
        debug!(?trigger, "trigger received");
        self.run_cycle().await;
    }

    /// Single-flight entry point. Concurrent callers coalesce: whoever loses
    /// the flag race returns immediately and is served by the in-flight
    /// cycle's fresh fetches.
    async fn run_cycle(&self) {
        let child = match self.state.lock().await.child {
            Some(child) => child,
            None => return,
        };

        if self
            .evaluating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("evaluation already in flight, coalescing trigger");
            return;
        }

        let result = self.cycle(child).await;
        self.evaluating.store(false, Ordering::Release);

        // Cycle failures never propagate out of the manager: the last pushed
        // state stays enforced and the next trigger retries.
        if let Err(e) = result {
            warn!(%child, "evaluation cycle aborted: {}", e);
        }
    }

    async fn cycle(&self, child: Uuid) -> Result<()> {
        let now = Local::now();

        // Four independent read-only fetches; the cycle proceeds only once
        // all of them have succeeded. No partial data ever reaches the
        // evaluator.
        let (policy, overrides, usage, installed) = tokio::try_join!(
            self.store.fetch_policy(child),
            self.store.fetch_active_overrides(child, now),
            self.usage.fetch_usage_snapshot(),
            self.usage.fetch_installed_packages(),
        )?;

        let decisions =
            evaluate(&policy, &overrides, &usage, &installed, &self.config.allowlist, now);
        let limits = effective_app_limits(&policy, now);

        let previous = self.state.lock().await.last_decisions.clone();
        self.send_notifications(&decisions, &previous, &limits, &usage, now).await;

        // stop() may have run while the fetches were in flight. The push
        // below still completes with the final decision set, but a stopped
        // manager must not rearm the wake stop() just cancelled or keep
        // session state past the teardown.
        let next_wake = if *self.running_tx.borrow() {
            // Rescheduled from the current rule set every cycle; rules may
            // have changed since the wake was last armed.
            let next_wake = next_transition(&policy.windows, now);
            self.surface.cancel_scheduled_wakes().await?;
            if let Some(at) = next_wake {
                self.surface.schedule_wake(at).await?;
            }
            next_wake
        } else {
            debug!(%child, "manager stopped mid-cycle, skipping wake rescheduling");
            None
        };

        if self.surface.is_available() && self.surface.is_permission_granted() {
            let decision_list: Vec<BlockDecision> = decisions.iter().cloned().collect();
            self.surface.push_block_decisions(&decision_list).await?;
            self.surface.push_app_limits(&limits).await?;
        } else {
            debug!("enforcement surface unavailable or not permitted, skipping push");
        }

        let mut state = self.state.lock().await;
        if *self.running_tx.borrow() {
            state.last_decisions = decisions;
            state.scheduled_wake = next_wake;
        }
        Ok(())
    }

    /// Step 3 of the cycle: alerts for newly appearing quota blocks and for
    /// apps whose remaining time dropped under the warning threshold while
    /// still unblocked. Blanket bedtime/focus blocks are silent; the lock
    /// screen itself tells the story.
    async fn send_notifications(
        &self,
        decisions: &BTreeSet<BlockDecision>,
        previous: &BTreeSet<BlockDecision>,
        limits: &std::collections::HashMap<String, u32>,
        usage: &guardian_common::UsageSnapshot,
        now: DateTime<Local>,
    ) {
        let today = now.date_naive();
        let mut tracker = self.tracker.lock().await;

        for decision in decisions.difference(previous) {
            let (cause, subject) = match decision.reason {
                BlockReason::DailyQuota => ("daily_limit", "device"),
                BlockReason::AppQuota => ("app_limit", decision.package.as_str()),
                BlockReason::Bedtime | BlockReason::Focus => continue,
            };
            if tracker.should_notify(cause, subject, today) {
                if let Err(e) = self.surface.notify(cause, subject).await {
                    warn!(cause, subject, "notification failed: {}", e);
                }
            }
        }

        for (package, limit) in limits {
            if decisions.iter().any(|d| &d.package == package) {
                continue;
            }
            let used = usage.get(package).copied().unwrap_or(0);
            let remaining = remaining_secs(*limit, used);
            if remaining > 0
                && remaining <= self.config.low_time_warning_secs
                && tracker.should_notify("app_limit_warning", package, today)
            {
                if let Err(e) = self.surface.notify("app_limit_warning", package).await {
                    warn!(package = %package, "notification failed: {}", e);
                }
            }
        }
    }
}
