//! Cache Metrics
//!
//! Per-shard counters live inside each shard and are only mutated under
//! that shard's write lock. Aggregates are built by read-locking one shard
//! at a time and summing, so a snapshot taken under concurrent writers can
//! mix before/after states of different shards. Metrics never feed back
//! into cache decisions.

use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Emit one hit-rate summary line per this many hits
pub const HIT_LOG_INTERVAL: u64 = 100;

/// Emit one insert summary line per this many inserts
pub const PUT_LOG_INTERVAL: u64 = 50;

/// Counters owned by one shard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Expired entries removed on lookup (also counted as misses)
    pub expirations: u64,
    pub inserts: u64,
    pub bytes_used: u64,
    pub entries: u64,
    /// Body bytes served from cache
    pub cached_bytes: u64,
    /// Body bytes fetched from the backend on a miss
    pub missed_bytes: u64,
}

impl AddAssign for ShardStats {
    fn add_assign(&mut self, other: Self) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.evictions += other.evictions;
        self.expirations += other.expirations;
        self.inserts += other.inserts;
        self.bytes_used += other.bytes_used;
        self.entries += other.entries;
        self.cached_bytes += other.cached_bytes;
        self.missed_bytes += other.missed_bytes;
    }
}

impl ShardStats {
    /// Lookup hit rate in percent
    pub fn hit_rate(&self) -> f64 {
        percent(self.hits, self.hits + self.misses)
    }

    /// Share of response bytes served from cache, in percent
    pub fn byte_hit_rate(&self) -> f64 {
        percent(self.cached_bytes, self.cached_bytes + self.missed_bytes)
    }
}

/// The four headline counters summed over all shards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub bytes_used: u64,
}

impl From<ShardStats> for CacheMetrics {
    fn from(stats: ShardStats) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            bytes_used: stats.bytes_used,
        }
    }
}

/// Full point-in-time view used by the exporter and the `/stats` endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub totals: ShardStats,
    pub hit_rate: f64,
    pub byte_hit_rate: f64,
    pub tracked_admissions: u64,
    pub max_bytes: u64,
    pub shard_count: usize,
    /// Fullest shard's usage relative to its budget, in percent
    pub max_shard_fill: f64,
}

impl MetricsSnapshot {
    /// Build a snapshot from per-shard stats
    pub fn from_shards(
        shards: &[ShardStats],
        tracked_admissions: u64,
        max_bytes: u64,
        shard_budget: u64,
    ) -> Self {
        let mut totals = ShardStats::default();
        let mut fullest = 0;
        for stats in shards {
            totals += *stats;
            fullest = fullest.max(stats.bytes_used);
        }

        Self {
            hit_rate: totals.hit_rate(),
            byte_hit_rate: totals.byte_hit_rate(),
            totals,
            tracked_admissions,
            max_bytes,
            shard_count: shards.len(),
            max_shard_fill: percent(fullest, shard_budget),
        }
    }
}

/// `part / whole * 100`, or 0 when `whole` is 0
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Sampling counters for periodic debug summaries
#[derive(Debug, Default)]
pub struct LogSampler {
    hits: AtomicU64,
    puts: AtomicU64,
}

impl LogSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a hit; true once every [`HIT_LOG_INTERVAL`] hits
    pub fn record_hit(&self) -> bool {
        (self.hits.fetch_add(1, Ordering::Relaxed) + 1) % HIT_LOG_INTERVAL == 0
    }

    /// Count an insert; true once every [`PUT_LOG_INTERVAL`] inserts
    pub fn record_put(&self) -> bool {
        (self.puts.fetch_add(1, Ordering::Relaxed) + 1) % PUT_LOG_INTERVAL == 0
    }

    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
