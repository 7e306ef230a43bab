//! Recovery policy: which single action an application gets this cycle
//!
//! Branches are evaluated in a fixed priority order and the first match wins:
//!
//! 1. Healthy and Synced: recover (resume if paused, report if it had been failing)
//! 2. Degraded/Error on a new known revision that is not our own revert: roll it back
//! 3. Paused: leave the application alone
//! 4. Degraded/Error: sync while under the attempt cap, then pause and notify
//! 5. OutOfSync: sync
//! 6. Anything else: log only

use crate::argocd::{ApplicationSnapshot, SyncStatus};

use super::state::ApplicationState;

/// Default cap on consecutive recovery attempts before escalating
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Recover {
        resume: bool,
        notify: bool,
    },
    Rollback {
        previous_revision: String,
    },
    LeavePaused,
    /// Failing and under the cap: sync and count the attempt
    Retry,
    /// Failing at the cap and not yet reported: pause and notify
    Escalate,
    /// Failing at the cap and already reported
    AwaitOperator,
    Sync,
    Unknown,
}

pub fn decide(
    snapshot: &ApplicationSnapshot,
    state: &ApplicationState,
    max_attempts: u32,
) -> Decision {
    if snapshot.is_healthy_and_synced() {
        return Decision::Recover {
            resume: state.paused,
            notify: state.needs_recovery_notice(),
        };
    }

    if snapshot.health.is_failing()
        && state.revision_changed(snapshot)
        && !state.is_own_rollback(snapshot)
    {
        return Decision::Rollback {
            previous_revision: state.last_revision.clone(),
        };
    }

    if state.paused {
        return Decision::LeavePaused;
    }

    if snapshot.health.is_failing() {
        return if state.consecutive_recovery_attempts < max_attempts {
            Decision::Retry
        } else if !state.notified {
            Decision::Escalate
        } else {
            Decision::AwaitOperator
        };
    }

    if snapshot.sync == SyncStatus::OutOfSync {
        return Decision::Sync;
    }

    Decision::Unknown
}

/// Attempts have hit the cap and no failure notice has gone out yet
pub fn reached_cap(state: &ApplicationState, max_attempts: u32) -> bool {
    state.consecutive_recovery_attempts >= max_attempts && !state.notified
}
