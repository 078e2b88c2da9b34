//! Metrics Exposition
//!
//! Prometheus export of engine snapshots and the small HTTP surface the
//! daemon serves (`/metrics`, `/healthz`, `/stats`).

mod exporter;
mod server;

pub use exporter::CacheExporter;
pub use server::{respond, serve, ServerState};
