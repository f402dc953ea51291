//! Background reclamation of idle and abandoned sandboxes.
//!
//! Two independent policies, both funneling into the controller's stop
//! path: a periodic sweep over all running sandboxes older than the
//! idle threshold, and a one-shot deferred check per logout. Sweeps log
//! outcomes and never raise to callers that are not explicitly polling
//! results. Neither holds any lock across a runtime call.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ReclaimConfig;
use crate::lifecycle::LifecycleController;
use crate::store::SandboxStatus;

/// Runs the idle-timeout and logout-grace reclamation policies.
pub struct ReclamationScheduler {
    controller: Arc<LifecycleController>,
    idle_threshold: chrono::Duration,
    logout_grace: Duration,
    sweep_interval: Duration,
    pending_logouts: Mutex<HashSet<i64>>,
}

/// Handle to the self-scheduling idle sweep task.
pub struct IdleSweepHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl IdleSweepHandle {
    /// Signal the sweep loop to exit and wait for it.
    #[allow(dead_code)] // Called by the embedding API layer at shutdown
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

impl ReclamationScheduler {
    pub fn new(controller: Arc<LifecycleController>, config: &ReclaimConfig) -> Arc<Self> {
        Self::with_durations(
            controller,
            config.idle_threshold(),
            config.logout_grace(),
            config.sweep_interval(),
        )
    }

    pub fn with_durations(
        controller: Arc<LifecycleController>,
        idle_threshold: chrono::Duration,
        logout_grace: Duration,
        sweep_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            controller,
            idle_threshold,
            logout_grace,
            sweep_interval,
            pending_logouts: Mutex::new(HashSet::new()),
        })
    }

    /// One pass over all running sandboxes, stopping those idle past
    /// the threshold. Returns how many were stopped.
    pub async fn run_idle_sweep(&self) -> usize {
        let records = match self.controller.store().snapshots() {
            Ok(records) => records,
            Err(err) => {
                warn!("Idle sweep could not read records: {}", err);
                return 0;
            }
        };

        let now = chrono::Utc::now();
        let mut stopped = 0;
        for record in records {
            if record.status != SandboxStatus::Running {
                continue;
            }
            let idle_for = now - record.last_activity_at;
            if idle_for <= self.idle_threshold {
                continue;
            }
            info!(
                "Sandbox for user {} idle for {}m, reclaiming",
                record.user_id,
                idle_for.num_minutes()
            );
            match self.controller.stop(record.user_id).await {
                Ok(()) => stopped += 1,
                Err(err) => warn!(
                    "Idle reclamation failed for user {}: {}",
                    record.user_id, err
                ),
            }
        }
        stopped
    }

    /// Spawn the self-scheduling idle sweep loop. The returned handle
    /// stops it cleanly at process shutdown.
    #[allow(dead_code)] // Used by long-running embeddings, not the one-shot CLI
    pub fn spawn_idle_loop(self: &Arc<Self>) -> IdleSweepHandle {
        let (stop, mut stopped) = watch::channel(false);
        let scheduler = Arc::clone(self);
        let interval = self.sweep_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let count = scheduler.run_idle_sweep().await;
                        if count > 0 {
                            info!("Idle sweep reclaimed {} sandbox(es)", count);
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });

        IdleSweepHandle { stop, task }
    }

    /// Defer a single reclamation check for `user_id` by the grace
    /// period. Scheduling again while a check is pending is a no-op, so
    /// repeated logouts do not stack tasks.
    pub fn schedule_logout_cleanup(self: &Arc<Self>, user_id: i64) {
        {
            let mut pending = self
                .pending_logouts
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if !pending.insert(user_id) {
                debug!("Logout cleanup already pending for user {}", user_id);
                return;
            }
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.logout_grace).await;

            // Activity during the grace period does not cancel the
            // check; an already-stopped sandbox just makes it a no-op.
            if scheduler.controller.store().status(user_id) == SandboxStatus::Running {
                match scheduler.controller.stop(user_id).await {
                    Ok(()) => info!("Reclaimed sandbox for logged-out user {}", user_id),
                    Err(err) => warn!("Logout cleanup failed for user {}: {}", user_id, err),
                }
            } else {
                debug!("Logout cleanup for user {}: nothing running", user_id);
            }

            // The pending flag clears only once the stop has finished,
            // so pollers observe completion rather than mere expiry of
            // the grace.
            scheduler
                .pending_logouts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&user_id);
        });
    }

    /// Whether a logout check is still pending for the user.
    pub fn logout_pending(&self, user_id: i64) -> bool {
        self.pending_logouts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&user_id)
    }

    /// Remove exited-but-not-removed containers. Delegates to the
    /// controller, which also releases lingering leases.
    #[allow(dead_code)] // Used by long-running embeddings, not the one-shot CLI
    pub async fn run_stale_sweep(&self) -> usize {
        match self.controller.sweep_stale().await {
            Ok(removed) => removed,
            Err(err) => {
                warn!("Stale sweep failed: {}", err);
                0
            }
        }
    }
}
