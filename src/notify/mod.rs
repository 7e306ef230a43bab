//! Operator-facing notifications

mod slack;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;

pub use slack::SlackNotifier;

/// Sends a structured status message about one application.
///
/// The reconciler treats delivery as fire-and-forget: an error is logged and
/// never retried within the same cycle.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, app: &str, status: &str, attempts: u32, action: &str) -> Result<()>;
}

/// Notifier that only writes the message to the log
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, app: &str, status: &str, attempts: u32, action: &str) -> Result<()> {
        info!(app, status, attempts, "Notification: {}", action);
        Ok(())
    }
}
