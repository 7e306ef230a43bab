//! Argo CD control-plane boundary
//!
//! The reconciler only talks to Argo CD through the [`ControlPlane`] trait so the
//! state machine can be driven by recording fakes in tests.

mod client;
mod types;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use client::{ArgoCdClient, ArgoCdClientConfig};
pub use types::{
    ApplicationSnapshot, ApplicationSource, HealthStatus, SyncStatus, REVISION_ANNOTATION,
    UNKNOWN_REVISION,
};

/// Operations the reconciler needs from the GitOps control plane.
///
/// Every call carries its own timeout. Implementations must return `Ok(vec![])`
/// rather than an error when there are simply no applications.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn list_applications(&self, timeout: Duration) -> Result<Vec<ApplicationSnapshot>>;

    async fn get_application(&self, name: &str, timeout: Duration)
        -> Result<ApplicationSnapshot>;

    /// Ask Argo CD to re-compare live state without changing it
    async fn refresh_application(&self, name: &str, timeout: Duration) -> Result<()>;

    async fn sync_application(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Stop automated syncing for the application
    async fn pause_application(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Re-enable automated syncing for the application
    async fn resume_application(&self, name: &str, timeout: Duration) -> Result<()>;
}
