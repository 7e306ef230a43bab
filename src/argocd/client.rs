//! Argo CD REST API client

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::types::{Application, ApplicationList, ApplicationSnapshot};
use super::ControlPlane;
use crate::error::{Error, Result};

/// Connection settings for [`ArgoCdClient`]
#[derive(Clone, Debug, Default)]
pub struct ArgoCdClientConfig {
    /// Base API URL including the `/api/v1` prefix
    pub api_url: String,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// `prune` flag restored on resume
    pub resume_prune: bool,
    /// `selfHeal` flag restored on resume
    pub resume_self_heal: bool,
}

#[derive(Deserialize)]
struct SessionResponse {
    token: String,
}

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// Argo CD API client authenticated with a bearer token.
///
/// With username/password credentials the session token is renewed when
/// Argo CD rejects it, and the request is retried once.
#[derive(Clone)]
pub struct ArgoCdClient {
    client: Client,
    base_url: String,
    token: Arc<RwLock<String>>,
    credentials: Option<Credentials>,
    resume_prune: bool,
    resume_self_heal: bool,
}

impl ArgoCdClient {
    /// Build the client, logging in with username/password when no token is configured
    pub async fn connect(config: ArgoCdClientConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .user_agent(concat!("argocd-guardian/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpError)?;
        let base_url = config.api_url.trim_end_matches('/').to_string();

        let (token, credentials) = match (config.token, config.username, config.password) {
            (Some(token), _, _) => (token, None),
            (None, Some(username), Some(password)) => {
                let token = Self::login(&client, &base_url, &username, &password, timeout).await?;
                (token, Some(Credentials { username, password }))
            }
            _ => {
                return Err(Error::ConfigError(
                    "Argo CD credentials require a token or a username and password".to_string(),
                ))
            }
        };

        Ok(Self {
            client,
            base_url,
            token: Arc::new(RwLock::new(token)),
            credentials,
            resume_prune: config.resume_prune,
            resume_self_heal: config.resume_self_heal,
        })
    }

    async fn login(
        client: &Client,
        base_url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<String> {
        let response = client
            .post(format!("{base_url}/session"))
            .json(&json!({ "username": username, "password": password }))
            .timeout(timeout)
            .send()
            .await?;
        let session: SessionResponse = check_status(response).await?.json().await?;
        info!("Authenticated against Argo CD as {}", username);
        Ok(session.token)
    }

    fn app_url(&self, name: &str) -> String {
        format!("{}/applications/{}", self.base_url, name)
    }

    /// Replace `stale` with a fresh session token, unless another caller already did
    async fn renew_session(
        &self,
        credentials: &Credentials,
        stale: &str,
        timeout: Duration,
    ) -> Result<String> {
        let mut token = self.token.write().await;
        if *token != stale {
            return Ok(token.clone());
        }
        let fresh = Self::login(
            &self.client,
            &self.base_url,
            &credentials.username,
            &credentials.password,
            timeout,
        )
        .await?;
        *token = fresh.clone();
        Ok(fresh)
    }

    /// Send an authorized request built by `build`, renewing an expired session once
    async fn send<F>(&self, build: F, timeout: Duration) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send,
    {
        let token = self.token.read().await.clone();
        let response = build(&self.client)
            .bearer_auth(&token)
            .timeout(timeout)
            .send()
            .await?;

        match &self.credentials {
            Some(credentials) if response.status() == StatusCode::UNAUTHORIZED => {
                warn!("Argo CD session rejected, logging in again");
                let fresh = self.renew_session(credentials, &token, timeout).await?;
                let retried = build(&self.client)
                    .bearer_auth(&fresh)
                    .timeout(timeout)
                    .send()
                    .await?;
                check_status(retried).await
            }
            _ => check_status(response).await,
        }
    }

    async fn patch_application(
        &self,
        name: &str,
        patch: serde_json::Value,
        timeout: Duration,
    ) -> Result<()> {
        // Argo CD expects the patch document itself as a string
        let body = json!({
            "name": name,
            "patch": serde_json::to_string(&patch)?,
            "patchType": "merge",
        });
        let url = self.app_url(name);
        self.send(|client| client.patch(&url).json(&body), timeout).await?;
        Ok(())
    }
}

/// Map non-2xx responses to [`Error::ControlPlane`] with the response body as message
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::ControlPlane {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ControlPlane for ArgoCdClient {
    #[instrument(skip(self))]
    async fn list_applications(&self, timeout: Duration) -> Result<Vec<ApplicationSnapshot>> {
        let url = format!("{}/applications", self.base_url);
        let list: ApplicationList = self
            .send(|client| client.get(&url), timeout)
            .await?
            .json()
            .await?;

        let snapshots: Vec<_> = list
            .items
            .unwrap_or_default()
            .into_iter()
            .filter_map(Application::into_snapshot)
            .collect();
        debug!("Listed {} applications", snapshots.len());
        Ok(snapshots)
    }

    #[instrument(skip(self))]
    async fn get_application(&self, name: &str, timeout: Duration) -> Result<ApplicationSnapshot> {
        let url = self.app_url(name);
        let app: Application = self
            .send(|client| client.get(&url), timeout)
            .await?
            .json()
            .await?;
        app.into_snapshot().ok_or_else(|| Error::ControlPlane {
            status: 200,
            message: format!("application {name} has no metadata.name"),
        })
    }

    #[instrument(skip(self))]
    async fn refresh_application(&self, name: &str, timeout: Duration) -> Result<()> {
        let url = self.app_url(name);
        self.send(
            |client| client.get(&url).query(&[("refresh", "normal")]),
            timeout,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn sync_application(&self, name: &str, timeout: Duration) -> Result<()> {
        let url = format!("{}/sync", self.app_url(name));
        self.send(|client| client.post(&url).json(&json!({})), timeout).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pause_application(&self, name: &str, timeout: Duration) -> Result<()> {
        let patch = json!({ "spec": { "syncPolicy": { "automated": null } } });
        self.patch_application(name, patch, timeout).await
    }

    #[instrument(skip(self))]
    async fn resume_application(&self, name: &str, timeout: Duration) -> Result<()> {
        let patch = json!({
            "spec": {
                "syncPolicy": {
                    "automated": {
                        "prune": self.resume_prune,
                        "selfHeal": self.resume_self_heal,
                    }
                }
            }
        });
        self.patch_application(name, patch, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argocd::{HealthStatus, SyncStatus};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn client_for(server: &MockServer) -> ArgoCdClient {
        ArgoCdClient::connect(
            ArgoCdClientConfig {
                api_url: format!("{}/api/v1/", server.uri()),
                token: Some("secret-token".to_string()),
                ..Default::default()
            },
            TIMEOUT,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_applications_parses_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {
                        "metadata": {"name": "app-1"},
                        "status": {
                            "health": {"status": "Healthy"},
                            "sync": {"status": "Synced", "revision": "abc"}
                        }
                    },
                    {"status": {"health": {"status": "Degraded"}}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let apps = client_for(&server)
            .await
            .list_applications(TIMEOUT)
            .await
            .unwrap();

        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "app-1");
        assert_eq!(apps[0].health, HealthStatus::Healthy);
        assert_eq!(apps[0].sync, SyncStatus::Synced);
        assert_eq!(apps[0].revision, "abc");
    }

    #[tokio::test]
    async fn test_list_applications_null_items_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items": null}"#))
            .mount(&server)
            .await;

        let apps = client_for(&server)
            .await
            .list_applications(TIMEOUT)
            .await
            .unwrap();
        assert!(apps.is_empty());
    }

    #[tokio::test]
    async fn test_list_applications_unauthorized_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid session"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .list_applications(TIMEOUT)
            .await
            .unwrap_err();
        match err {
            Error::ControlPlane { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid session");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sync_posts_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/applications/web-api/sync"))
            .and(body_json(serde_json::json!({})))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .await
            .sync_application("web-api", TIMEOUT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_requests_normal_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications/web-api"))
            .and(query_param("refresh", "normal"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .await
            .refresh_application("web-api", TIMEOUT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pause_removes_automated_sync_policy() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/v1/applications/web-api"))
            .and(body_json(serde_json::json!({
                "name": "web-api",
                "patch": r#"{"spec":{"syncPolicy":{"automated":null}}}"#,
                "patchType": "merge"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .await
            .pause_application("web-api", TIMEOUT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_application_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .get_application("missing", TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ControlPlane { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_login_with_username_and_password() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/session"))
            .and(body_json(serde_json::json!({
                "username": "admin",
                "password": "hunter2"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "jwt"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications"))
            .and(header("authorization", "Bearer jwt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items": []}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = ArgoCdClient::connect(
            ArgoCdClientConfig {
                api_url: format!("{}/api/v1", server.uri()),
                username: Some("admin".to_string()),
                password: Some("hunter2".to_string()),
                ..Default::default()
            },
            TIMEOUT,
        )
        .await
        .unwrap();

        assert!(client.list_applications(TIMEOUT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_is_renewed_and_request_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/session"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "jwt-1"})),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/session"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "jwt-2"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications"))
            .and(header("authorization", "Bearer jwt-1"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token is expired"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications"))
            .and(header("authorization", "Bearer jwt-2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items": []}"#))
            .expect(2)
            .mount(&server)
            .await;

        let client = ArgoCdClient::connect(
            ArgoCdClientConfig {
                api_url: format!("{}/api/v1", server.uri()),
                username: Some("admin".to_string()),
                password: Some("hunter2".to_string()),
                ..Default::default()
            },
            TIMEOUT,
        )
        .await
        .unwrap();

        assert!(client.list_applications(TIMEOUT).await.unwrap().is_empty());
        // The renewed token is kept for later calls
        assert!(client.list_applications(TIMEOUT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_static_token_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/session"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/applications/web-api/sync"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .sync_application("web-api", TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ControlPlane { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_connect_without_credentials_fails() {
        let result = ArgoCdClient::connect(
            ArgoCdClientConfig {
                api_url: "http://localhost:1/api/v1".to_string(),
                username: Some("admin".to_string()),
                ..Default::default()
            },
            TIMEOUT,
        )
        .await;
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }
}
