//! Command-line and file configuration
//!
//! Every flag can also be set from the environment. An optional TOML file
//! fills in tuning values that were not given on the command line.

mod secret;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

pub use secret::{webhook_from_data, webhook_from_secret};

use crate::argocd::ArgoCdClientConfig;
use crate::controller::{ReconcilerConfig, DEFAULT_MAX_ATTEMPTS};
use crate::error::{Error, Result};
use crate::rollback::GitRollbackConfig;
use crate::scheduler::SchedulerConfig;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_ERROR_BACKOFF_SECS: u64 = 30;
const DEFAULT_RETRY_BACKOFF_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ROLLBACK_TIMEOUT_SECS: u64 = 120;
const DEFAULT_WORKERS: usize = 5;

/// Connection flags shared by every command that talks to Argo CD
#[derive(Args, Debug, Clone, Default)]
pub struct ArgoCdArgs {
    /// Argo CD API base URL, e.g. https://argocd.example.com/api/v1
    #[arg(long, env = "ARGOCD_API")]
    pub argocd_api: Option<String>,

    /// Bearer token for the Argo CD API
    #[arg(long, env = "ARGOCD_TOKEN", hide_env_values = true)]
    pub argocd_token: Option<String>,

    /// Username for session login when no token is given
    #[arg(long, env = "ARGOCD_USERNAME")]
    pub argocd_username: Option<String>,

    #[arg(long, env = "ARGOCD_PASSWORD", hide_env_values = true)]
    pub argocd_password: Option<String>,

    /// Skip TLS certificate verification for the Argo CD API
    #[arg(long, env = "ARGOCD_INSECURE")]
    pub insecure: bool,

    /// Deadline in seconds for each Argo CD and Slack call
    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,
}

impl ArgoCdArgs {
    /// Validate the connection flags into a client configuration
    pub fn client_config(&self) -> Result<ArgoCdClientConfig> {
        let api_url = self
            .argocd_api
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::ConfigError("--argocd-api (ARGOCD_API) is required".to_string()))?;
        parse_http_url("--argocd-api", api_url)?;

        let has_token = self.argocd_token.as_deref().is_some_and(|t| !t.is_empty());
        let has_login = self.argocd_username.is_some() && self.argocd_password.is_some();
        if !has_token && !has_login {
            return Err(Error::ConfigError(
                "Argo CD credentials missing: set ARGOCD_TOKEN or ARGOCD_USERNAME and ARGOCD_PASSWORD"
                    .to_string(),
            ));
        }

        Ok(ArgoCdClientConfig {
            api_url: api_url.to_string(),
            token: self.argocd_token.clone().filter(|t| !t.is_empty()),
            username: self.argocd_username.clone(),
            password: self.argocd_password.clone(),
            insecure: self.insecure,
            resume_prune: true,
            resume_self_heal: true,
        })
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        positive_secs(
            "request-timeout-secs",
            self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }
}

/// Flags for the `run` and `once` commands
#[derive(Args, Debug, Clone)]
pub struct GuardianArgs {
    #[command(flatten)]
    pub argocd: ArgoCdArgs,

    /// Slack incoming webhook URL
    #[arg(long, env = "SLACK_WEBHOOK_URL", hide_env_values = true)]
    pub slack_webhook_url: Option<String>,

    /// Kubernetes Secret holding the Slack webhook URL, used when no URL is given
    #[arg(long, env = "SLACK_SECRET_NAME")]
    pub slack_secret_name: Option<String>,

    #[arg(long, env = "SLACK_SECRET_NAMESPACE", default_value = "argocd")]
    pub slack_secret_namespace: String,

    #[arg(long, env = "SLACK_SECRET_KEY", default_value = "SLACK_WEBHOOK_URL")]
    pub slack_secret_key: String,

    /// Comma-separated application names that are never touched
    #[arg(long, env = "EXCLUDED_APPS", value_delimiter = ',')]
    pub excluded_apps: Vec<String>,

    #[arg(long, env = "POLL_INTERVAL_SECS")]
    pub poll_interval_secs: Option<u64>,

    /// Sleep after a cycle whose application listing failed
    #[arg(long, env = "ERROR_BACKOFF_SECS")]
    pub error_backoff_secs: Option<u64>,

    /// Sleep after each recovery sync
    #[arg(long, env = "RETRY_BACKOFF_SECS")]
    pub retry_backoff_secs: Option<u64>,

    /// Deadline for a whole rollback (clone, revert, push, resync)
    #[arg(long, env = "ROLLBACK_TIMEOUT_SECS")]
    pub rollback_timeout_secs: Option<u64>,

    /// Recovery syncs before the application is paused and escalated
    #[arg(long, env = "MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// Applications reconciled concurrently
    #[arg(long, env = "WORKERS")]
    pub workers: Option<usize>,

    /// Repository to roll back when an application has no source repo
    #[arg(long, env = "ROLLBACK_REPO")]
    pub rollback_repo: Option<String>,

    #[arg(long, env = "ROLLBACK_BRANCH", default_value = "main")]
    pub rollback_branch: String,

    #[arg(long, env = "GIT_AUTHOR_NAME", default_value = "argocd-guardian")]
    pub git_author_name: String,

    #[arg(long, env = "GIT_AUTHOR_EMAIL", default_value = "argocd-guardian@localhost")]
    pub git_author_email: String,

    /// Never revert commits; failing revisions are only retried and escalated
    #[arg(long, env = "DISABLE_ROLLBACK")]
    pub disable_rollback: bool,

    /// Evaluate and log decisions without calling Argo CD, Slack or git
    #[arg(long, env = "DRY_RUN")]
    pub dry_run: bool,

    /// TOML file with tuning values
    #[arg(long, env = "GUARDIAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address for health, metrics and the state API
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: SocketAddr,
}

/// Tuning values read from `--config`. Command-line and environment values win.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub excluded_apps: Vec<String>,
    pub poll_interval_secs: Option<u64>,
    pub error_backoff_secs: Option<u64>,
    pub retry_backoff_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub rollback_timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub workers: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
            .map_err(|e| Error::ConfigError(format!("Invalid config file {}: {e}", path.display())))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Where the Slack webhook URL comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookSource {
    Url(String),
    Secret {
        name: String,
        namespace: String,
        key: String,
    },
    /// Dry-run without a webhook: notifications are only logged
    LogOnly,
}

/// Validated runtime settings
#[derive(Clone, Debug)]
pub struct Settings {
    pub argocd: ArgoCdClientConfig,
    pub request_timeout: Duration,
    pub reconciler: ReconcilerConfig,
    pub scheduler: SchedulerConfig,
    pub webhook: WebhookSource,
    /// `None` when rollback is disabled
    pub rollback: Option<GitRollbackConfig>,
    pub http_addr: SocketAddr,
}

impl GuardianArgs {
    /// Load the optional config file and validate everything
    pub fn into_settings(self) -> Result<Settings> {
        let file = match &self.config {
            Some(path) => {
                debug!("Loading config file {}", path.display());
                FileConfig::load(path)?
            }
            None => FileConfig::default(),
        };
        self.resolve(file)
    }

    /// Merge `file` under the flags and validate
    pub fn resolve(self, file: FileConfig) -> Result<Settings> {
        let mut argocd_args = self.argocd;
        if argocd_args.request_timeout_secs.is_none() {
            argocd_args.request_timeout_secs = file.request_timeout_secs;
        }
        let argocd = argocd_args.client_config()?;
        let request_timeout = argocd_args.request_timeout()?;

        let poll_interval = positive_secs(
            "poll-interval-secs",
            self.poll_interval_secs
                .or(file.poll_interval_secs)
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        )?;
        let error_backoff = positive_secs(
            "error-backoff-secs",
            self.error_backoff_secs
                .or(file.error_backoff_secs)
                .unwrap_or(DEFAULT_ERROR_BACKOFF_SECS),
        )?;
        let retry_backoff = positive_secs(
            "retry-backoff-secs",
            self.retry_backoff_secs
                .or(file.retry_backoff_secs)
                .unwrap_or(DEFAULT_RETRY_BACKOFF_SECS),
        )?;
        let rollback_timeout = positive_secs(
            "rollback-timeout-secs",
            self.rollback_timeout_secs
                .or(file.rollback_timeout_secs)
                .unwrap_or(DEFAULT_ROLLBACK_TIMEOUT_SECS),
        )?;

        let max_attempts = self
            .max_attempts
            .or(file.max_attempts)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(Error::ConfigError("--max-attempts must be at least 1".to_string()));
        }
        let workers = self.workers.or(file.workers).unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(Error::ConfigError("--workers must be at least 1".to_string()));
        }

        let webhook = match (self.slack_webhook_url, self.slack_secret_name) {
            (Some(url), _) if !url.is_empty() => {
                parse_http_url("--slack-webhook-url", &url)?;
                WebhookSource::Url(url)
            }
            (_, Some(name)) if !name.is_empty() => WebhookSource::Secret {
                name,
                namespace: self.slack_secret_namespace,
                key: self.slack_secret_key,
            },
            _ if self.dry_run => WebhookSource::LogOnly,
            _ => {
                return Err(Error::ConfigError(
                    "Slack webhook missing: set SLACK_WEBHOOK_URL or SLACK_SECRET_NAME".to_string(),
                ))
            }
        };

        let rollback = (!self.disable_rollback).then(|| GitRollbackConfig {
            fallback_repo: self.rollback_repo.filter(|r| !r.is_empty()),
            branch: self.rollback_branch,
            author_name: self.git_author_name,
            author_email: self.git_author_email,
            sync_timeout: request_timeout,
        });

        let excluded_apps: HashSet<String> = self
            .excluded_apps
            .into_iter()
            .chain(file.excluded_apps)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        Ok(Settings {
            argocd,
            request_timeout,
            reconciler: ReconcilerConfig {
                excluded_apps,
                max_attempts,
                retry_backoff,
                request_timeout,
                rollback_timeout,
                dry_run: self.dry_run,
            },
            scheduler: SchedulerConfig {
                poll_interval,
                error_backoff,
                workers,
                list_timeout: request_timeout,
            },
            webhook,
            rollback,
            http_addr: self.http_addr,
        })
    }
}

fn positive_secs(flag: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(Error::ConfigError(format!("--{flag} must be positive")));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_http_url(flag: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| Error::ConfigError(format!("{flag} is not a valid URL ({raw}): {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::ConfigError(format!(
            "{flag} must use http or https, got {other}"
        ))),
    }
}
