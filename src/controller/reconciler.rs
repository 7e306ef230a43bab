//! Reconciliation engine for Argo CD applications
//!
//! Applies the recovery policy to one application snapshot at a time and
//! carries out the chosen action against the collaborators. Collaborator
//! failures are logged and never escape a single application's reconcile.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::policy::{self, Decision, DEFAULT_MAX_ATTEMPTS};
use super::state::{ApplicationState, StateTable};
use crate::argocd::{ApplicationSnapshot, ControlPlane, HealthStatus};
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::rollback::RollbackExecutor;

#[cfg(feature = "metrics")]
use super::metrics;

/// Tuning for the reconciliation engine
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Applications that are never touched
    pub excluded_apps: HashSet<String>,
    /// Consecutive recovery attempts before pausing and notifying
    pub max_attempts: u32,
    /// Pause after a recovery sync before moving on
    pub retry_backoff: Duration,
    /// Deadline for each control-plane and notification call
    pub request_timeout: Duration,
    /// Deadline for a whole rollback (clone, revert, push, resync)
    pub rollback_timeout: Duration,
    /// Evaluate and record state but only log side effects; no action metrics are counted
    pub dry_run: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            excluded_apps: HashSet::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            rollback_timeout: Duration::from_secs(120),
            dry_run: false,
        }
    }
}

/// What the engine did for an application in one cycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ReconcileAction {
    /// Healthy and synced, nothing to report
    Healthy,
    /// Healthy and synced after a failure episode
    Recovered,
    RolledBack { revision: String },
    RollbackFailed { revision: String },
    LeftPaused,
    /// Recovery sync issued
    Retried { attempts: u32 },
    /// Gave up: automated sync paused and operator notified
    Paused { attempts: u32 },
    AwaitingOperator,
    Synced { attempts: u32 },
    Unknown,
}

/// Run `call` under `timeout`, turning an elapsed deadline into [`Error::Timeout`]
pub(crate) async fn with_timeout<T, F>(operation: &'static str, timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout { operation, timeout }),
    }
}

/// The reconciliation engine. Owns the per-application state table.
pub struct Reconciler {
    config: ReconcilerConfig,
    control_plane: Arc<dyn ControlPlane>,
    notifier: Arc<dyn Notifier>,
    rollback: Arc<dyn RollbackExecutor>,
    state: StateTable,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        control_plane: Arc<dyn ControlPlane>,
        notifier: Arc<dyn Notifier>,
        rollback: Arc<dyn RollbackExecutor>,
    ) -> Self {
        Self {
            config,
            control_plane,
            notifier,
            rollback,
            state: StateTable::default(),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn state(&self) -> &StateTable {
        &self.state
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.config.excluded_apps.contains(name)
    }

    /// Reconcile one application snapshot.
    ///
    /// Returns `None` for excluded applications, which get no state entry and
    /// no collaborator calls.
    #[instrument(skip(self, snapshot), fields(app = %snapshot.name, health = %snapshot.health, sync = %snapshot.sync))]
    pub async fn reconcile_application(
        &self,
        snapshot: ApplicationSnapshot,
    ) -> Option<ReconcileAction> {
        if self.is_excluded(&snapshot.name) {
            debug!("Skipping excluded application {}", snapshot.name);
            return None;
        }

        debug!("Processing application {}", snapshot.name);

        if snapshot.health != HealthStatus::Healthy {
            self.refresh(&snapshot.name).await;
        }

        let mut state = self.state.checkout(&snapshot).await;
        let decision = policy::decide(&snapshot, &state, self.config.max_attempts);
        debug!(?decision, "Policy decision");

        let action = self.apply(decision, &snapshot, &mut state).await;

        state.record(&snapshot);
        state.last_action = Some(action.clone());
        self.state.store(&snapshot.name, state).await;

        Some(action)
    }

    async fn apply(
        &self,
        decision: Decision,
        snapshot: &ApplicationSnapshot,
        state: &mut ApplicationState,
    ) -> ReconcileAction {
        let name = snapshot.name.as_str();

        match decision {
            Decision::Recover { resume, notify } => {
                let attempts = state.consecutive_recovery_attempts;
                if resume {
                    self.resume(name).await;
                }
                if notify {
                    info!("{} recovered after {} attempt(s)", name, attempts);
                    self.notify(
                        name,
                        snapshot.health.as_str(),
                        attempts,
                        "recovered: application is Healthy and Synced",
                        "recovered",
                    )
                    .await;
                } else {
                    debug!("{} is Healthy and Synced", name);
                }
                state.reset_recovery();
                if notify {
                    ReconcileAction::Recovered
                } else {
                    ReconcileAction::Healthy
                }
            }
            Decision::Rollback { previous_revision } => {
                warn!(
                    "{} is {} on new revision {} (was {}), rolling back",
                    name, snapshot.health, snapshot.revision, previous_revision
                );
                state.flagged_problematic = true;
                self.rollback(snapshot, state).await
            }
            Decision::LeavePaused => {
                debug!("{} is paused, leaving it alone", name);
                ReconcileAction::LeftPaused
            }
            Decision::Retry => {
                state.flagged_problematic = true;
                self.sync(name).await;
                state.consecutive_recovery_attempts =
                    state.consecutive_recovery_attempts.saturating_add(1);
                let attempts = state.consecutive_recovery_attempts;
                warn!(
                    "{} is {}, recovery sync {}/{}",
                    name, snapshot.health, attempts, self.config.max_attempts
                );

                if !self.config.retry_backoff.is_zero() {
                    tokio::time::sleep(self.config.retry_backoff).await;
                }

                if policy::reached_cap(state, self.config.max_attempts) {
                    self.escalate(snapshot, state).await;
                    ReconcileAction::Paused { attempts }
                } else {
                    ReconcileAction::Retried { attempts }
                }
            }
            Decision::Escalate => {
                state.flagged_problematic = true;
                self.escalate(snapshot, state).await;
                ReconcileAction::Paused {
                    attempts: state.consecutive_recovery_attempts,
                }
            }
            Decision::AwaitOperator => {
                state.flagged_problematic = true;
                debug!("{} is waiting for an operator", name);
                ReconcileAction::AwaitingOperator
            }
            Decision::Sync => {
                info!("{} is OutOfSync, syncing", name);
                self.sync(name).await;
                state.consecutive_recovery_attempts =
                    state.consecutive_recovery_attempts.saturating_add(1);
                ReconcileAction::Synced {
                    attempts: state.consecutive_recovery_attempts,
                }
            }
            Decision::Unknown => {
                info!(
                    "{} is in an unknown state: health={}, sync={}",
                    name, snapshot.health, snapshot.sync
                );
                ReconcileAction::Unknown
            }
        }
    }

    async fn escalate(&self, snapshot: &ApplicationSnapshot, state: &mut ApplicationState) {
        let name = snapshot.name.as_str();
        let attempts = state.consecutive_recovery_attempts;
        error!(
            "{} still {} after {} recovery attempts, pausing",
            name, snapshot.health, attempts
        );

        self.pause(name).await;
        self.notify(
            name,
            snapshot.health.as_str(),
            attempts,
            &format!("paused after {attempts} failed attempts"),
            "paused",
        )
        .await;
        state.paused = true;
        state.notified = true;
    }

    async fn rollback(
        &self,
        snapshot: &ApplicationSnapshot,
        state: &mut ApplicationState,
    ) -> ReconcileAction {
        let name = snapshot.name.as_str();
        let revision = snapshot.revision.clone();
        let attempts = state.consecutive_recovery_attempts;

        if self.config.dry_run {
            info!("[dry-run] would roll back {} at revision {}", name, revision);
            return ReconcileAction::RolledBack { revision };
        }

        let result = with_timeout(
            "rollback",
            self.config.rollback_timeout,
            self.rollback.rollback(snapshot),
        )
        .await;

        #[cfg(feature = "metrics")]
        metrics::record_rollback(name, result.is_ok());

        match result {
            Ok(pushed) => {
                info!("Rollback completed for {} (revision {})", name, revision);
                if pushed.is_some() {
                    state.rollback_commit = pushed;
                }
                self.notify(
                    name,
                    snapshot.health.as_str(),
                    attempts,
                    &format!("rollback performed for revision {revision}"),
                    "rollback",
                )
                .await;
                ReconcileAction::RolledBack { revision }
            }
            Err(e) => {
                error!("Rollback failed for {}: {}", name, e);
                self.notify(
                    name,
                    snapshot.health.as_str(),
                    attempts,
                    &format!("rollback failed for revision {revision}: {e}"),
                    "rollback",
                )
                .await;
                ReconcileAction::RollbackFailed { revision }
            }
        }
    }

    async fn refresh(&self, name: &str) {
        if self.config.dry_run {
            info!("[dry-run] would refresh {}", name);
            return;
        }
        let timeout = self.config.request_timeout;
        if let Err(e) = with_timeout(
            "refresh_application",
            timeout,
            self.control_plane.refresh_application(name, timeout),
        )
        .await
        {
            warn!("Failed to refresh {}: {}", name, e);
        }
    }

    /// Issue a sync. The attempt is counted by the caller whether or not the call succeeds.
    async fn sync(&self, name: &str) {
        if self.config.dry_run {
            info!("[dry-run] would sync {}", name);
            return;
        }

        #[cfg(feature = "metrics")]
        metrics::record_sync_attempt(name);
        let timeout = self.config.request_timeout;
        if let Err(e) = with_timeout(
            "sync_application",
            timeout,
            self.control_plane.sync_application(name, timeout),
        )
        .await
        {
            warn!("Failed to sync {}: {}", name, e);
        }
    }

    async fn pause(&self, name: &str) {
        if self.config.dry_run {
            info!("[dry-run] would pause {}", name);
            return;
        }
        let timeout = self.config.request_timeout;
        if let Err(e) = with_timeout(
            "pause_application",
            timeout,
            self.control_plane.pause_application(name, timeout),
        )
        .await
        {
            warn!("Failed to pause {}: {}", name, e);
        }
    }

    async fn resume(&self, name: &str) {
        if self.config.dry_run {
            info!("[dry-run] would resume {}", name);
            return;
        }
        let timeout = self.config.request_timeout;
        if let Err(e) = with_timeout(
            "resume_application",
            timeout,
            self.control_plane.resume_application(name, timeout),
        )
        .await
        {
            warn!("Failed to resume {}: {}", name, e);
        }
    }

    async fn notify(&self, name: &str, status: &str, attempts: u32, action: &str, kind: &str) {
        if self.config.dry_run {
            info!("[dry-run] would notify for {}: {}", name, action);
            return;
        }

        #[cfg(feature = "metrics")]
        metrics::record_notification(name, kind);
        #[cfg(not(feature = "metrics"))]
        let _ = kind;

        let timeout = self.config.request_timeout;
        if let Err(e) = with_timeout(
            "notify",
            timeout,
            self.notifier.notify(name, status, attempts, action),
        )
        .await
        {
            warn!("Failed to send notification for {}: {}", name, e);
        }
    }
}
