//! Error types for the guardian

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid startup configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transport-level HTTP failure (connect, TLS, body decode)
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Argo CD answered with a non-success status
    #[error("Argo CD API returned {status}: {message}")]
    ControlPlane { status: u16, message: String },

    #[error("Notification failed: {0}")]
    NotificationError(String),

    #[error("Rollback failed: {0}")]
    RollbackError(String),

    /// A git subprocess exited unsuccessfully
    #[error("git {command} failed: {stderr}")]
    GitCommand { command: String, stderr: String },

    /// A collaborator call exceeded its deadline
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Kubernetes API error (secret lookup)
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl Error {
    /// Short category name used for log fields and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConfigError(_) | Error::TomlError(_) => "config",
            Error::HttpError(_) | Error::ControlPlane { .. } => "control_plane",
            Error::NotificationError(_) => "notification",
            Error::RollbackError(_) | Error::GitCommand { .. } => "rollback",
            Error::Timeout { .. } => "timeout",
            Error::KubeError(_) => "kube",
            Error::SerializationError(_) => "serialization",
            Error::IoError(_) => "io",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_names_operation() {
        let err = Error::Timeout {
            operation: "sync_application",
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "sync_application timed out after 10s");
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_control_plane_display() {
        let err = Error::ControlPlane {
            status: 403,
            message: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("403"));
        assert_eq!(err.kind(), "control_plane");
    }
}
