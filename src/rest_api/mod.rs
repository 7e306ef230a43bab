//! REST API module for operators and Kubernetes health checks
//!
//! Serves health, Prometheus metrics, and a read-only view of the
//! per-application state table.

mod dto;
mod handlers;
mod server;

pub use dto::{ApplicationListResponse, ApplicationStatusResponse, ErrorResponse, HealthResponse};
pub use server::{router, run_server};
