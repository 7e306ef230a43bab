//! Recording fakes for the collaborator traits, shared by unit tests

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::argocd::{ApplicationSnapshot, ControlPlane};
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::rollback::RollbackExecutor;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    List,
    Get(String),
    Refresh(String),
    Sync(String),
    Pause(String),
    Resume(String),
}

fn injected(operation: &str) -> Error {
    Error::ControlPlane {
        status: 500,
        message: format!("injected {operation} failure"),
    }
}

/// Control plane that serves a fixed application list and records every call
#[derive(Default)]
pub struct RecordingControlPlane {
    apps: Mutex<Vec<ApplicationSnapshot>>,
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<&'static str>>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingControlPlane {
    pub fn with_apps(apps: Vec<ApplicationSnapshot>) -> Self {
        let plane = Self::default();
        plane.set_apps(apps);
        plane
    }

    pub fn set_apps(&self, apps: Vec<ApplicationSnapshot>) {
        *self.apps.lock().unwrap() = apps;
    }

    /// Make every call of `operation` ("list", "sync", ...) fail
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    /// Delay sync calls, used to exercise timeouts
    pub fn delay_sync(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: Call, operation: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(operation) {
            return Err(injected(operation));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for RecordingControlPlane {
    async fn list_applications(&self, _timeout: Duration) -> Result<Vec<ApplicationSnapshot>> {
        self.record(Call::List, "list")?;
        Ok(self.apps.lock().unwrap().clone())
    }

    async fn get_application(
        &self,
        name: &str,
        _timeout: Duration,
    ) -> Result<ApplicationSnapshot> {
        self.record(Call::Get(name.to_string()), "get")?;
        self.apps
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .ok_or_else(|| Error::ControlPlane {
                status: 404,
                message: format!("application {name} not found"),
            })
    }

    async fn refresh_application(&self, name: &str, _timeout: Duration) -> Result<()> {
        self.record(Call::Refresh(name.to_string()), "refresh")
    }

    async fn sync_application(&self, name: &str, _timeout: Duration) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(Call::Sync(name.to_string()), "sync")
    }

    async fn pause_application(&self, name: &str, _timeout: Duration) -> Result<()> {
        self.record(Call::Pause(name.to_string()), "pause")
    }

    async fn resume_application(&self, name: &str, _timeout: Duration) -> Result<()> {
        self.record(Call::Resume(name.to_string()), "resume")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub app: String,
    pub status: String,
    pub attempts: u32,
    pub action: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn fail(&self) {
        *self.failing.lock().unwrap() = true;
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_containing(&self, needle: &str) -> usize {
        self.sent()
            .iter()
            .filter(|n| n.action.contains(needle))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, app: &str, status: &str, attempts: u32, action: &str) -> Result<()> {
        self.sent.lock().unwrap().push(Notification {
            app: app.to_string(),
            status: status.to_string(),
            attempts,
            action: action.to_string(),
        });
        if *self.failing.lock().unwrap() {
            return Err(Error::NotificationError("injected failure".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingRollback {
    requests: Mutex<Vec<(String, String)>>,
    failing: Mutex<bool>,
    pushed: Mutex<Option<String>>,
}

impl RecordingRollback {
    pub fn fail(&self) {
        *self.failing.lock().unwrap() = true;
    }

    /// Report `commit` as the revert pushed by successful rollbacks
    pub fn pushes(&self, commit: &str) {
        *self.pushed.lock().unwrap() = Some(commit.to_string());
    }

    /// (application, revision) pairs in request order
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RollbackExecutor for RecordingRollback {
    async fn rollback(&self, app: &ApplicationSnapshot) -> Result<Option<String>> {
        self.requests
            .lock()
            .unwrap()
            .push((app.name.clone(), app.revision.clone()));
        if *self.failing.lock().unwrap() {
            return Err(Error::RollbackError("injected failure".to_string()));
        }
        Ok(self.pushed.lock().unwrap().clone())
    }
}
