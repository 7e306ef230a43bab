//! Slack webhook lookup from a Kubernetes Secret

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::Api;
use tracing::info;

use crate::error::{Error, Result};

/// Read the webhook URL stored under `key` in Secret `namespace/name`
pub async fn webhook_from_secret(
    client: kube::Client,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<String> {
    let secrets: Api<Secret> = Api::namespaced(client, namespace);
    let secret = secrets.get(name).await.map_err(Error::KubeError)?;
    let data = secret
        .data
        .ok_or_else(|| Error::ConfigError(format!("Secret {namespace}/{name} has no data")))?;

    let url = webhook_from_data(&data, key)
        .map_err(|e| Error::ConfigError(format!("Secret {namespace}/{name}: {e}")))?;
    info!("Loaded Slack webhook from secret {}/{}", namespace, name);
    Ok(url)
}

/// Extract a non-empty UTF-8 value for `key` from secret data
pub fn webhook_from_data(data: &BTreeMap<String, ByteString>, key: &str) -> Result<String> {
    let raw = data
        .get(key)
        .ok_or_else(|| Error::ConfigError(format!("missing key {key}")))?;
    let value = std::str::from_utf8(&raw.0)
        .map_err(|_| Error::ConfigError(format!("key {key} is not valid UTF-8")))?
        .trim();
    if value.is_empty() {
        return Err(Error::ConfigError(format!("key {key} is empty")));
    }
    Ok(value.to_string())
}
