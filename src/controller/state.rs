//! Per-application reconciliation memory
//!
//! One [`ApplicationState`] per application name, created the first time the
//! application is observed and kept for the life of the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::reconciler::ReconcileAction;
use crate::argocd::{ApplicationSnapshot, HealthStatus, UNKNOWN_REVISION};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationState {
    pub last_health: HealthStatus,
    /// Last known revision; polls reporting no revision leave it untouched
    pub last_revision: String,
    pub consecutive_recovery_attempts: u32,
    /// A failure notification went out for the current failure episode
    pub notified: bool,
    /// The guardian gave up retrying and paused automated sync
    pub paused: bool,
    /// Health was Degraded/Error at some point in the current episode
    pub flagged_problematic: bool,
    /// Revert commit pushed by the last rollback of the current episode
    pub rollback_commit: Option<String>,
    pub first_seen: DateTime<Utc>,
    /// Last time health or revision changed between polls
    pub last_transition: DateTime<Utc>,
    pub last_action: Option<ReconcileAction>,
}

impl ApplicationState {
    /// Fresh state seeded from the first observation
    pub fn observed(snapshot: &ApplicationSnapshot) -> Self {
        let now = Utc::now();
        Self {
            last_health: snapshot.health.clone(),
            last_revision: snapshot.revision.clone(),
            consecutive_recovery_attempts: 0,
            notified: false,
            paused: false,
            flagged_problematic: false,
            rollback_commit: None,
            first_seen: now,
            last_transition: now,
            last_action: None,
        }
    }

    /// Back to Healthy+Synced: start the next failure episode from scratch
    pub fn reset_recovery(&mut self) {
        self.consecutive_recovery_attempts = 0;
        self.notified = false;
        self.paused = false;
        self.flagged_problematic = false;
        self.rollback_commit = None;
    }

    pub fn needs_recovery_notice(&self) -> bool {
        self.notified || self.paused || self.flagged_problematic
    }

    /// A different known revision is deployed. The unknown placeholder on
    /// either side never counts as a change.
    pub fn revision_changed(&self, snapshot: &ApplicationSnapshot) -> bool {
        self.last_revision != UNKNOWN_REVISION
            && snapshot.revision != UNKNOWN_REVISION
            && self.last_revision != snapshot.revision
    }

    /// The snapshot reports the commit our own rollback pushed
    pub fn is_own_rollback(&self, snapshot: &ApplicationSnapshot) -> bool {
        self.rollback_commit.as_deref() == Some(snapshot.revision.as_str())
    }

    /// Remember this poll's health and revision for the next comparison
    pub fn record(&mut self, snapshot: &ApplicationSnapshot) {
        let revision_known = snapshot.revision != UNKNOWN_REVISION;
        if self.last_health != snapshot.health
            || (revision_known && self.last_revision != snapshot.revision)
        {
            self.last_transition = Utc::now();
        }
        self.last_health = snapshot.health.clone();
        if revision_known {
            self.last_revision = snapshot.revision.clone();
        }
    }
}

/// Shared table of application states.
///
/// Workers take a copy of their entry, work without holding the lock, and
/// write the entry back. Within a cycle each name is handled by one worker.
#[derive(Clone, Default)]
pub struct StateTable {
    inner: Arc<Mutex<HashMap<String, ApplicationState>>>,
}

impl StateTable {
    /// Copy of the entry for `snapshot.name`, inserting a fresh one on first sight
    pub async fn checkout(&self, snapshot: &ApplicationSnapshot) -> ApplicationState {
        let mut table = self.inner.lock().await;
        table
            .entry(snapshot.name.clone())
            .or_insert_with(|| ApplicationState::observed(snapshot))
            .clone()
    }

    pub async fn store(&self, name: &str, state: ApplicationState) {
        self.inner.lock().await.insert(name.to_string(), state);
    }

    pub async fn get(&self, name: &str) -> Option<ApplicationState> {
        self.inner.lock().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.lock().await.contains_key(name)
    }

    /// Name-ordered copy of the whole table
    pub async fn entries(&self) -> BTreeMap<String, ApplicationState> {
        self.inner
            .lock()
            .await
            .iter()
            .map(|(name, state)| (name.clone(), state.clone()))
            .collect()
    }

    pub async fn paused_count(&self) -> usize {
        self.inner.lock().await.values().filter(|s| s.paused).count()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argocd::SyncStatus;

    fn snapshot(health: HealthStatus, revision: &str) -> ApplicationSnapshot {
        ApplicationSnapshot::new("web-api", health, SyncStatus::Synced, revision)
    }

    #[tokio::test]
    async fn test_checkout_inserts_once() {
        let table = StateTable::default();
        let first = snapshot(HealthStatus::Degraded, "v1");

        let state = table.checkout(&first).await;
        assert_eq!(state.last_health, HealthStatus::Degraded);
        assert_eq!(state.last_revision, "v1");

        let mut updated = state.clone();
        updated.consecutive_recovery_attempts = 2;
        table.store("web-api", updated).await;

        // A later checkout sees the stored entry, not a fresh one
        let again = table.checkout(&snapshot(HealthStatus::Healthy, "v2")).await;
        assert_eq!(again.consecutive_recovery_attempts, 2);
        assert_eq!(again.last_revision, "v1");
        assert_eq!(table.len().await, 1);
    }

    #[test]
    fn test_reset_recovery_clears_flags_together() {
        let mut state = ApplicationState::observed(&snapshot(HealthStatus::Degraded, "v1"));
        state.consecutive_recovery_attempts = 3;
        state.notified = true;
        state.paused = true;
        state.flagged_problematic = true;
        state.rollback_commit = Some("r1".to_string());
        assert!(state.needs_recovery_notice());

        state.reset_recovery();
        assert_eq!(state.rollback_commit, None);

        assert_eq!(state.consecutive_recovery_attempts, 0);
        assert!(!state.notified);
        assert!(!state.paused);
        assert!(!state.flagged_problematic);
        assert!(!state.needs_recovery_notice());
    }

    #[test]
    fn test_record_tracks_transitions() {
        let mut state = ApplicationState::observed(&snapshot(HealthStatus::Healthy, "v1"));
        let seen = state.last_transition;

        state.record(&snapshot(HealthStatus::Healthy, "v1"));
        assert_eq!(state.last_transition, seen);

        let next = snapshot(HealthStatus::Degraded, "v2");
        assert!(state.revision_changed(&next));
        state.record(&next);
        assert_eq!(state.last_health, HealthStatus::Degraded);
        assert_eq!(state.last_revision, "v2");
        assert!(state.last_transition >= seen);
    }

    #[test]
    fn test_unknown_revision_is_never_a_change() {
        let mut state = ApplicationState::observed(&snapshot(HealthStatus::Degraded, "abc123"));

        let missing = snapshot(HealthStatus::Degraded, UNKNOWN_REVISION);
        assert!(!state.revision_changed(&missing));
        state.record(&missing);
        assert_eq!(state.last_revision, "abc123");

        let back = snapshot(HealthStatus::Degraded, "abc123");
        assert!(!state.revision_changed(&back));

        // Seeded without a revision, the first known one is adopted quietly
        let mut state = ApplicationState::observed(&missing);
        assert!(!state.revision_changed(&back));
        state.record(&back);
        assert_eq!(state.last_revision, "abc123");
    }

    #[test]
    fn test_own_rollback_commit_is_recognised() {
        let mut state = ApplicationState::observed(&snapshot(HealthStatus::Degraded, "bad"));
        state.rollback_commit = Some("revert".to_string());

        assert!(state.is_own_rollback(&snapshot(HealthStatus::Degraded, "revert")));
        assert!(!state.is_own_rollback(&snapshot(HealthStatus::Degraded, "other")));
    }

    #[tokio::test]
    async fn test_paused_count() {
        let table = StateTable::default();
        let mut state = table.checkout(&snapshot(HealthStatus::Degraded, "v1")).await;
        state.paused = true;
        table.store("web-api", state).await;
        table
            .checkout(&ApplicationSnapshot::new(
                "other",
                HealthStatus::Healthy,
                SyncStatus::Synced,
                "v1",
            ))
            .await;

        assert_eq!(table.paused_count().await, 1);
        assert_eq!(table.entries().await.len(), 2);
    }
}
