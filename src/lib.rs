//! argocd-guardian: automated recovery for Argo CD applications
//!
//! Polls an Argo CD instance, retries failing applications, pauses and
//! escalates when retries run out, and rolls back bad revisions in Git.

pub mod argocd;
pub mod config;
pub mod controller;
pub mod error;
pub mod notify;
pub mod rollback;
pub mod scheduler;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::error::{Error, Result};
