//! Source-repository rollback

mod git;

use async_trait::async_trait;

use crate::argocd::ApplicationSnapshot;
use crate::error::{Error, Result};

pub use git::{GitRollback, GitRollbackConfig};

/// Reverts the desired-state change behind a failing application and resyncs it
#[async_trait]
pub trait RollbackExecutor: Send + Sync {
    /// Returns the commit pushed by the rollback, when the executor knows it.
    /// Argo CD reports that commit as the application's revision afterwards.
    async fn rollback(&self, app: &ApplicationSnapshot) -> Result<Option<String>>;
}

/// Executor used when rollbacks are switched off; every request fails
#[derive(Clone, Debug, Default)]
pub struct DisabledRollback;

#[async_trait]
impl RollbackExecutor for DisabledRollback {
    async fn rollback(&self, app: &ApplicationSnapshot) -> Result<Option<String>> {
        Err(Error::RollbackError(format!(
            "rollback is disabled, {} left at revision {}",
            app.name, app.revision
        )))
    }
}
