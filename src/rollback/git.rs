//! Rollback by reverting the offending commit in the GitOps repository
//!
//! Each rollback works in a throwaway clone:
//! 1. clone the application's source repository on the tracked branch
//! 2. revert the application's current revision, which must exist in the clone
//! 3. push the revert and ask Argo CD to sync the application
//!
//! Merge commits are reverted against their first parent.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use super::RollbackExecutor;
use crate::argocd::{ApplicationSnapshot, ControlPlane, UNKNOWN_REVISION};
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct GitRollbackConfig {
    /// Repository used when the application does not report a source
    pub fallback_repo: Option<String>,
    /// Branch pushed to when the source has no usable target revision
    pub branch: String,
    pub author_name: String,
    pub author_email: String,
    /// Timeout for the resync issued after the push
    pub sync_timeout: Duration,
}

impl Default for GitRollbackConfig {
    fn default() -> Self {
        Self {
            fallback_repo: None,
            branch: "main".to_string(),
            author_name: "argocd-guardian".to_string(),
            author_email: "argocd-guardian@localhost".to_string(),
            sync_timeout: Duration::from_secs(10),
        }
    }
}

pub struct GitRollback {
    config: GitRollbackConfig,
    control_plane: Arc<dyn ControlPlane>,
}

impl GitRollback {
    pub fn new(config: GitRollbackConfig, control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            config,
            control_plane,
        }
    }

    fn repo_for<'a>(&'a self, app: &'a ApplicationSnapshot) -> Result<&'a str> {
        app.source
            .as_ref()
            .map(|s| s.repo_url.as_str())
            .or(self.config.fallback_repo.as_deref())
            .ok_or_else(|| {
                Error::RollbackError(format!("no source repository known for {}", app.name))
            })
    }

    fn branch_for<'a>(&'a self, app: &'a ApplicationSnapshot) -> &'a str {
        app.source
            .as_ref()
            .and_then(|s| s.target_revision.as_deref())
            .filter(|r| !r.is_empty() && *r != "HEAD")
            .unwrap_or(self.config.branch.as_str())
    }

    async fn git(&self, workdir: &Path, args: &[&str]) -> Result<String> {
        let author_name = format!("user.name={}", self.config.author_name);
        let author_email = format!("user.email={}", self.config.author_email);

        debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .args(["-c", author_name.as_str(), "-c", author_email.as_str()])
            .args(args)
            .current_dir(workdir)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::GitCommand {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Resolve the deployed revision to a commit in the clone
    async fn revert_target(&self, checkout: &Path, revision: &str) -> Result<String> {
        if revision.is_empty() || revision == UNKNOWN_REVISION {
            return Err(Error::RollbackError(
                "application reports no revision to revert".to_string(),
            ));
        }
        let commit = format!("{revision}^{{commit}}");
        self.git(checkout, &["rev-parse", "--verify", "--quiet", &commit])
            .await
            .map_err(|e| {
                Error::RollbackError(format!(
                    "revision {revision} not found in repository: {e}"
                ))
            })
    }

    /// Whether `commit` has more than one parent
    async fn is_merge(&self, checkout: &Path, commit: &str) -> Result<bool> {
        let parents = self
            .git(checkout, &["rev-list", "--parents", "-n", "1", commit])
            .await?;
        // "<commit> <parent> [<parent> ...]"
        Ok(parents.split_whitespace().count() > 2)
    }
}

#[async_trait]
impl RollbackExecutor for GitRollback {
    #[instrument(skip(self, app), fields(app = %app.name, revision = %app.revision))]
    async fn rollback(&self, app: &ApplicationSnapshot) -> Result<Option<String>> {
        let repo = self.repo_for(app)?;
        let branch = self.branch_for(app);

        let scratch = tempfile::tempdir()?;
        let checkout = scratch.path().join("repo");
        let checkout_str = checkout.to_string_lossy().to_string();

        self.git(
            scratch.path(),
            &["clone", "--branch", branch, repo, &checkout_str],
        )
        .await?;

        let target = self.revert_target(&checkout, &app.revision).await?;
        if self.is_merge(&checkout, &target).await? {
            debug!("{} is a merge commit, reverting against its first parent", target);
            self.git(&checkout, &["revert", "--no-edit", "-m", "1", &target])
                .await?;
        } else {
            self.git(&checkout, &["revert", "--no-edit", &target]).await?;
        }
        let revert_commit = self.git(&checkout, &["rev-parse", "HEAD"]).await?;

        let refspec = format!("HEAD:{branch}");
        self.git(&checkout, &["push", "origin", &refspec]).await?;
        info!(
            "Pushed revert {} of {} to {} ({})",
            revert_commit, target, repo, branch
        );

        self.control_plane
            .sync_application(&app.name, self.config.sync_timeout)
            .await?;
        info!("Resync requested for {}", app.name);
        Ok(Some(revert_commit))
    }
}
