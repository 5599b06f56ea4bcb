//! KPI anomaly detection and channel root-cause attribution: library entry point.
//!
//! Exposes registry, anomaly, attribution, confidence, engine, store, and report
//! for use by the CLI and tests.

pub mod anomaly;
pub mod attribution;
pub mod confidence;
pub mod config;
pub mod engine;
pub mod registry;
pub mod report;
pub mod stats;
pub mod store;
pub mod util;
