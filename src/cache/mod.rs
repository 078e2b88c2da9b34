//! Sharded HTTP Response Cache
//!
//! Byte-budgeted in-memory cache of full response bodies for a reverse
//! proxy, keyed by a canonical request identity.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           CachePipeline                              │
//! │        policy ─► key ─► hash ─► get / check_admission / put          │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                            CacheEngine                               │
//! │   ┌─────────────┐ ┌─────────────┐        ┌─────────────┐             │
//! │   │  Shard 0    │ │  Shard 1    │  ...   │  Shard 63   │  RwLock     │
//! │   │ buckets+LRU │ │ buckets+LRU │        │ buckets+LRU │  each       │
//! │   └─────────────┘ └─────────────┘        └─────────────┘             │
//! │   ┌─────────────┐ ┌─────────────┐        ┌─────────────┐             │
//! │   │ Tracker 0   │ │ Tracker 1   │  ...   │ Tracker 63  │  Mutex      │
//! │   └─────────────┘ └─────────────┘        └─────────────┘             │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - Power-of-two shard count; routing is `hash & (shards - 1)`
//! - One lock per operation, never two at once
//! - Lazy expiry on lookup, LRU eviction on insert
//! - Second-hit admission keeps one-off objects out

mod admission;
mod clock;
mod config;
mod engine;
mod hash;
mod key;
mod metrics;
mod pipeline;
mod policy;
mod shard;
mod value;

pub use admission::{AdmissionTracker, TrackerShard, ADMISSION_CLEANUP_BUDGET};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use engine::{CacheEngine, Lookup};
pub use hash::{bucket_for, fnv1a_32_wide, fnv1a_64, hash_key, shard_for, Fingerprint, KeyHash};
pub use key::{
    build_cache_key, normalize_query, RequestKey, MAX_KEY_LEN, MAX_QUERY_PARAMS, MAX_VARY_LEN,
    QUERY_SORT_LIMIT,
};
pub use metrics::{percent, CacheMetrics, LogSampler, MetricsSnapshot, ShardStats};
pub use pipeline::{CachePipeline, Decision, Fetch, StoreTicket};
pub use policy::{has_authorization, CacheabilityPolicy, RequestInfo, ResponseInfo, Uncacheable};
pub use shard::{
    accounted_size, PutOutcome, Shard, ShardTable, ENTRY_OVERHEAD, EVICTION_SAFETY_CAP,
};
pub use value::{CacheValue, ResponseData, DEFAULT_CONTENT_TYPE, VALUE_OVERHEAD};

/// Default number of shards
pub const DEFAULT_SHARD_COUNT: usize = 64;

/// Default hash buckets per shard
pub const DEFAULT_BUCKETS_PER_SHARD: usize = 256;

/// Default total byte budget (256MB)
pub const DEFAULT_MAX_BYTES: u64 = 256 * 1024 * 1024;

/// Default time to live
pub const DEFAULT_TTL_SECS: u64 = 120;

/// Default admission window
pub const DEFAULT_ADMISSION_WINDOW_SECS: u64 = 10;

/// Largest cacheable body (128KB)
pub const DEFAULT_MAX_OBJECT_BYTES: usize = 128 * 1024;

// =============================================================================
// Tests
// =============================================================================
