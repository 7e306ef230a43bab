//! Application snapshot types and the Argo CD wire format they are parsed from

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Annotation Argo CD tooling uses to pin the deployed revision
pub const REVISION_ANNOTATION: &str = "argocd.argoproj.io/revision";

/// Revision reported when neither the annotation nor the sync status carry one
pub const UNKNOWN_REVISION: &str = "unknown";

/// Health of an application as reported by Argo CD
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum HealthStatus {
    Healthy,
    Progressing,
    Degraded,
    Suspended,
    Missing,
    Error,
    #[default]
    Unknown,
    /// Any status string this build does not know about
    Other(String),
}

impl HealthStatus {
    pub fn as_str(&self) -> &str {
        match self {
            HealthStatus::Healthy => "Healthy",
            HealthStatus::Progressing => "Progressing",
            HealthStatus::Degraded => "Degraded",
            HealthStatus::Suspended => "Suspended",
            HealthStatus::Missing => "Missing",
            HealthStatus::Error => "Error",
            HealthStatus::Unknown => "Unknown",
            HealthStatus::Other(s) => s,
        }
    }

    /// Degraded or Error: the states the recovery policy acts on
    pub fn is_failing(&self) -> bool {
        matches!(self, HealthStatus::Degraded | HealthStatus::Error)
    }
}

impl From<&str> for HealthStatus {
    fn from(s: &str) -> Self {
        match s {
            "Healthy" => HealthStatus::Healthy,
            "Progressing" => HealthStatus::Progressing,
            "Degraded" => HealthStatus::Degraded,
            "Suspended" => HealthStatus::Suspended,
            "Missing" => HealthStatus::Missing,
            "Error" => HealthStatus::Error,
            "Unknown" | "" => HealthStatus::Unknown,
            other => HealthStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for HealthStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Sync state of an application relative to its git source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SyncStatus {
    Synced,
    OutOfSync,
    #[default]
    Unknown,
}

impl From<&str> for SyncStatus {
    fn from(s: &str) -> Self {
        match s {
            "Synced" => SyncStatus::Synced,
            "OutOfSync" => SyncStatus::OutOfSync,
            _ => SyncStatus::Unknown,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Synced => "Synced",
            SyncStatus::OutOfSync => "OutOfSync",
            SyncStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Where an application's desired state lives in git
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub target_revision: Option<String>,
}

/// One application as observed during a single poll
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApplicationSnapshot {
    pub name: String,
    pub health: HealthStatus,
    pub sync: SyncStatus,
    pub revision: String,
    pub source: Option<ApplicationSource>,
}

impl ApplicationSnapshot {
    pub fn new(
        name: impl Into<String>,
        health: HealthStatus,
        sync: SyncStatus,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            health,
            sync,
            revision: revision.into(),
            source: None,
        }
    }

    pub fn is_healthy_and_synced(&self) -> bool {
        self.health == HealthStatus::Healthy && self.sync == SyncStatus::Synced
    }
}

// Wire format. Only the fields the guardian reads are modelled.

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApplicationList {
    #[serde(default)]
    pub items: Option<Vec<Application>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Application {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ApplicationSpec,
    #[serde(default)]
    pub status: ApplicationStatus,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ObjectMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApplicationSpec {
    #[serde(default)]
    pub source: Option<ApplicationSource>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApplicationStatus {
    #[serde(default)]
    pub health: Option<StatusField>,
    #[serde(default)]
    pub sync: Option<SyncField>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StatusField {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SyncField {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
}

impl Application {
    /// Convert to a snapshot; applications without a name are dropped
    pub(crate) fn into_snapshot(self) -> Option<ApplicationSnapshot> {
        let name = self.metadata.name?;

        let annotated = self
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(REVISION_ANNOTATION))
            .filter(|r| !r.is_empty())
            .cloned();
        let synced = self
            .status
            .sync
            .as_ref()
            .and_then(|s| s.revision.clone())
            .filter(|r| !r.is_empty());
        let revision = annotated
            .or(synced)
            .unwrap_or_else(|| UNKNOWN_REVISION.to_string());

        let health = self
            .status
            .health
            .as_ref()
            .and_then(|h| h.status.as_deref())
            .map(HealthStatus::from)
            .unwrap_or_default();
        let sync = self
            .status
            .sync
            .as_ref()
            .and_then(|s| s.status.as_deref())
            .map(SyncStatus::from)
            .unwrap_or_default();

        Some(ApplicationSnapshot {
            name,
            health,
            sync,
            revision,
            source: self.spec.source,
        })
    }
}
