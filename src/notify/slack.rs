//! Slack incoming-webhook notifier

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::Notifier;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct SlackNotifier {
    client: Client,
    webhook_url: String,
    timeout: Duration,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("argocd-guardian/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpError)?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            timeout,
        })
    }
}

/// Build the Block Kit payload for a status message
pub(crate) fn build_payload(app: &str, status: &str, attempts: u32, action: &str) -> Value {
    let body = format!(
        "*Application:* `{app}`\n*Status:* `{status}`\n*Attempts:* `{attempts}`\n*Action:* {action}\n"
    );
    json!({
        "text": format!(":warning: Application status: {app} is {status}"),
        "blocks": [
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": body }
            }
        ]
    })
}

#[async_trait]
impl Notifier for SlackNotifier {
    #[instrument(skip(self))]
    async fn notify(&self, app: &str, status: &str, attempts: u32, action: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&build_payload(app, status, attempts, action))
            .timeout(self.timeout)
            .send()
            .await?;

        let code = response.status();
        if !code.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::NotificationError(format!(
                "Slack webhook returned {code}: {body}"
            )));
        }
        debug!("Slack notification delivered for {}", app);
        Ok(())
    }
}
