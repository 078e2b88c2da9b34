//! ProxyCache - Sharded HTTP Response Cache
//!
//! In-memory response cache for a reverse proxy: full bodies keyed by a
//! canonical request identity, byte-budgeted per shard, expired lazily,
//! evicted LRU-first and gated by a second-hit admission rule.
//!
//! # Architecture
//!
//! ```text
//! Proxy worker → CachePipeline → CacheEngine → Shard (hash chains + LRU)
//!                                     └──────→ AdmissionTracker
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Key canonicalization, shards, admission, engine, pipeline
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus exporter and metrics/health endpoints

pub mod cache;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use cache::{
    CacheConfig, CacheEngine, CachePipeline, CacheValue, Decision, Lookup, RequestInfo,
    RequestKey, ResponseData, ResponseInfo,
};
pub use error::{Error, Result};
pub use metrics::CacheExporter;
