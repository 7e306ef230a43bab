//! Polling driver
//!
//! Runs the reconciliation engine on a fixed interval, fanning each cycle's
//! applications out over a bounded set of workers.

pub mod core;

pub use self::core::{CycleReport, Scheduler, SchedulerConfig};
