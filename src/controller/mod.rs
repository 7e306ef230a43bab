//! Controller module for Argo CD application reconciliation
//! This module contains the per-application state table, the recovery policy,
//! and the engine that applies it.

#[cfg(feature = "metrics")]
pub mod metrics;
pub mod policy;
mod reconciler;
pub mod state;

pub use policy::{decide, Decision, DEFAULT_MAX_ATTEMPTS};
pub(crate) use reconciler::with_timeout;
pub use reconciler::{ReconcileAction, Reconciler, ReconcilerConfig};
pub use state::{ApplicationState, StateTable};
