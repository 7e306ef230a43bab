//! Response bodies for the REST API

use serde::Serialize;

use crate::controller::ApplicationState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Applications with a state entry
    pub tracked_applications: usize,
    pub paused_applications: usize,
}

#[derive(Debug, Serialize)]
pub struct ApplicationStatusResponse {
    pub name: String,
    #[serde(flatten)]
    pub state: ApplicationState,
}

#[derive(Debug, Serialize)]
pub struct ApplicationListResponse {
    pub items: Vec<ApplicationStatusResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}
