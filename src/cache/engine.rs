//! Cache Engine
//!
//! Orchestrates the shards and the admission tracker behind one object
//! with an explicit lifecycle.
//!
//! # Concurrency
//!
//! - The live state sits in an `ArcSwapOption`; the hot path loads it
//!   without taking any global lock
//! - Each operation takes exactly one shard lock (or one tracker lock) and
//!   releases it before returning; no operation holds two at once
//! - `init` and `shutdown` are serialized by a lifecycle mutex
//! - Metrics read-lock one shard at a time

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::admission::AdmissionTracker;
use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::hash::KeyHash;
use super::key::RequestKey;
use super::metrics::{percent, CacheMetrics, LogSampler, MetricsSnapshot, ShardStats};
use super::shard::{percent_of, Shard, STAGE_ONE_MAX_EVICTIONS, STAGE_ONE_TARGET_PCT};
use super::value::{CacheValue, ResponseData};
use crate::error::{Error, Result};

/// Outcome of a lookup
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Shared snapshot of the stored response
    Hit(Arc<CacheValue>),
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn into_value(self) -> Option<Arc<CacheValue>> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss => None,
        }
    }
}

/// State that exists between `init` and `shutdown`
struct CacheCore {
    config: CacheConfig,
    shards: Box<[CachePadded<Shard>]>,
    admission: AdmissionTracker,
    shard_budget: u64,
    sampler: LogSampler,
    enabled: AtomicBool,
}

impl CacheCore {
    fn new(config: CacheConfig) -> Self {
        let shards = (0..config.shard_count)
            .map(|_| {
                CachePadded::new(Shard::new(config.buckets_per_shard, config.max_object_bytes))
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let admission = AdmissionTracker::new(
            config.shard_count,
            config.buckets_per_shard,
            config.admission_window_secs,
        );

        Self {
            shard_budget: config.shard_budget(),
            shards,
            admission,
            sampler: LogSampler::new(),
            enabled: AtomicBool::new(true),
            config,
        }
    }

    #[inline]
    fn shard(&self, key: &KeyHash) -> (usize, &Shard) {
        let idx = key.shard_index(self.shards.len());
        (idx, &self.shards[idx])
    }

    fn check_body(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(Error::InvalidInput("response body is empty".into()));
        }
        if len > self.config.max_object_bytes {
            return Err(Error::ObjectTooLarge {
                size: len,
                max: self.config.max_object_bytes,
            });
        }
        Ok(())
    }

    fn shard_stats(&self) -> Vec<ShardStats> {
        self.shards.iter().map(|shard| shard.stats()).collect()
    }

    fn totals(&self) -> ShardStats {
        let mut totals = ShardStats::default();
        for shard in self.shards.iter() {
            totals += shard.stats();
        }
        totals
    }

    fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
        self.admission.clear();
    }
}

/// Sharded HTTP response cache
pub struct CacheEngine {
    state: ArcSwapOption<CacheCore>,
    lifecycle: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEngine")
            .field("initialized", &self.is_initialized())
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for CacheEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheEngine {
    /// Uninitialized engine on the wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Uninitialized engine on a custom clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: ArcSwapOption::empty(),
            lifecycle: Mutex::new(()),
            clock,
        }
    }

    /// Create and initialize in one step
    pub fn start(config: CacheConfig) -> Result<Self> {
        let engine = Self::new();
        engine.init(config)?;
        Ok(engine)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Allocate shards and trackers.
    ///
    /// Zero budget, TTL or window select their defaults. Calling `init` on
    /// a running engine logs a warning and changes nothing.
    pub fn init(&self, config: CacheConfig) -> Result<()> {
        let config = config.normalized();
        config.validate()?;

        let _lifecycle = self.lifecycle.lock();
        if self.state.load().is_some() {
            warn!("Cache already initialized, ignoring init");
            return Ok(());
        }

        info!(
            max_bytes = config.max_bytes,
            shards = config.shard_count,
            buckets_per_shard = config.buckets_per_shard,
            default_ttl_secs = config.default_ttl_secs,
            admission_window_secs = config.admission_window_secs,
            max_object_bytes = config.max_object_bytes,
            "Cache initialized"
        );
        self.state.store(Some(Arc::new(CacheCore::new(config))));
        Ok(())
    }

    /// Drop every entry and tracker; later calls see `NotInitialized`
    pub fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock();
        match self.state.swap(None) {
            Some(core) => {
                core.enabled.store(false, Ordering::Release);
                let totals = core.totals();
                core.clear();
                info!(
                    hits = totals.hits,
                    misses = totals.misses,
                    evictions = totals.evictions,
                    "Cache shut down"
                );
            }
            None => debug!("Shutdown called on uninitialized cache"),
        }
    }

    /// True between `init` and `shutdown`
    pub fn is_initialized(&self) -> bool {
        self.state
            .load()
            .as_deref()
            .is_some_and(|core| core.enabled.load(Ordering::Acquire))
    }

    /// Active configuration
    pub fn config(&self) -> Option<CacheConfig> {
        self.state.load().as_deref().map(|core| core.config.clone())
    }

    fn with_core<R>(&self, f: impl FnOnce(&CacheCore) -> Result<R>) -> Result<R> {
        let guard = self.state.load();
        match guard.as_deref() {
            Some(core) if core.enabled.load(Ordering::Acquire) => f(core),
            _ => Err(Error::NotInitialized),
        }
    }

    // =========================================================================
    // Request Path
    // =========================================================================

    /// Look up a request
    pub fn get(&self, request: &RequestKey<'_>) -> Result<Lookup> {
        let key = request.key_hash()?;
        self.get_hashed(&key)
    }

    /// Look up a precomputed key
    pub fn get_hashed(&self, key: &KeyHash) -> Result<Lookup> {
        self.with_core(|core| {
            let now = self.clock.now_secs();
            let (idx, shard) = core.shard(key);
            let found = shard.write().get(key.hash, key.fingerprint, now);

            let Some(value) = found else {
                trace!(shard = idx, "cache miss");
                return Ok(Lookup::Miss);
            };

            trace!(shard = idx, bytes = value.body_len(), "cache hit");
            if core.sampler.record_hit() {
                let totals = core.totals();
                debug!(
                    hits = totals.hits,
                    misses = totals.misses,
                    hit_rate = totals.hit_rate(),
                    "cache hit rate"
                );
            }
            Ok(Lookup::Hit(value))
        })
    }

    /// Store a response for a request
    pub fn put(&self, request: &RequestKey<'_>, response: ResponseData) -> Result<()> {
        self.with_core(|core| core.check_body(response.body.len()))?;
        let key = request.key_hash()?;
        self.put_hashed(&key, response)
    }

    /// Store a response for a precomputed key.
    ///
    /// An existing entry for the key is replaced in place. The insert may
    /// evict least recently used entries of the same shard.
    pub fn put_hashed(&self, key: &KeyHash, response: ResponseData) -> Result<()> {
        self.with_core(|core| {
            core.check_body(response.body.len())?;

            let now = self.clock.now_secs();
            let ttl = match response.ttl_secs {
                0 => core.config.default_ttl_secs,
                ttl => ttl,
            };
            let value = CacheValue::from_response(response, now.saturating_add(ttl));
            let bytes = value.body_len();

            let (idx, shard) = core.shard(key);
            let outcome =
                shard
                    .write()
                    .put(key.hash, key.fingerprint, value, now, core.shard_budget)?;

            trace!(shard = idx, bytes, ttl, ?outcome, "cache put");
            if outcome.evicted() > 0 {
                debug!(
                    shard = idx,
                    evicted = outcome.evicted(),
                    "Evicted entries to stay within shard budget"
                );
            }
            if core.sampler.record_put() {
                let totals = core.totals();
                debug!(
                    puts = core.sampler.puts(),
                    entries = totals.entries,
                    bytes_used = totals.bytes_used,
                    "cache insert summary"
                );
            }
            Ok(())
        })
    }

    /// Second-hit admission check. False when the engine is not running.
    pub fn check_admission(&self, key: &KeyHash) -> bool {
        self.with_core(|core| Ok(core.admission.check(key, self.clock.now_secs())))
            .unwrap_or(false)
    }

    /// Remove the entry for a request
    pub fn invalidate(&self, request: &RequestKey<'_>) -> Result<()> {
        if request.host.is_empty() {
            return Err(Error::InvalidInput("host is required".into()));
        }
        let key = request.key_hash()?;
        self.invalidate_hashed(&key)
    }

    /// Remove the entry for a precomputed key; `NotFound` if absent
    pub fn invalidate_hashed(&self, key: &KeyHash) -> Result<()> {
        self.with_core(|core| {
            let (idx, shard) = core.shard(key);
            let removed = shard.write().invalidate(key.hash, key.fingerprint);
            match removed {
                Some(value) => {
                    debug!(shard = idx, bytes = value.body_len(), "Invalidated cache entry");
                    Ok(())
                }
                None => Err(Error::NotFound),
            }
        })
    }

    /// Record backend bytes fetched for a miss on `key`
    pub fn track_byte_miss(&self, key: &KeyHash, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let _ = self.with_core(|core| {
            core.shard(key).1.write().record_byte_miss(bytes);
            Ok(())
        });
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Trim every shard holding more than `max_bytes / shards`.
    ///
    /// Each over-budget shard evicts toward 90% of that target, at most
    /// ten entries per shard. Returns the number of entries evicted.
    pub fn evict_until_under(&self, max_bytes: u64) -> Result<usize> {
        self.with_core(|core| {
            if max_bytes == 0 {
                return Ok(0);
            }
            let per_shard = max_bytes / core.shards.len() as u64;
            let target = percent_of(per_shard, STAGE_ONE_TARGET_PCT);

            let mut evicted = 0;
            for (idx, shard) in core.shards.iter().enumerate() {
                let mut table = shard.write();
                if table.bytes_used() > per_shard {
                    let n = table.evict_until(target, STAGE_ONE_MAX_EVICTIONS);
                    if n > 0 {
                        trace!(shard = idx, evicted = n, "maintenance eviction");
                    }
                    evicted += n;
                }
            }

            if evicted > 0 {
                debug!(evicted, max_bytes, "Maintenance eviction pass");
            }
            Ok(evicted)
        })
    }

    /// Verify the structural invariants of every shard
    pub fn audit(&self) -> Result<()> {
        self.with_core(|core| {
            for (idx, shard) in core.shards.iter().enumerate() {
                shard
                    .read()
                    .audit()
                    .map_err(|e| Error::Internal(format!("shard {}: {}", idx, e)))?;
            }
            Ok(())
        })
    }

    // =========================================================================
    // Metrics
    // =========================================================================

    /// Hits, misses, evictions and bytes used over all shards
    pub fn metrics(&self) -> CacheMetrics {
        self.with_core(|core| Ok(CacheMetrics::from(core.totals())))
            .unwrap_or_default()
    }

    /// Lookup hit rate in percent
    pub fn hit_rate(&self) -> f64 {
        self.with_core(|core| Ok(core.totals().hit_rate()))
            .unwrap_or(0.0)
    }

    /// Cached bytes over all response bytes, in percent
    pub fn byte_hit_rate(&self) -> f64 {
        self.with_core(|core| Ok(core.totals().byte_hit_rate()))
            .unwrap_or(0.0)
    }

    /// Hits relative to `total_requests`, in percent (capped at 100)
    pub fn offload_percent(&self, total_requests: u64) -> f64 {
        if total_requests == 0 {
            return 0.0;
        }
        self.with_core(|core| Ok(percent(core.totals().hits, total_requests).min(100.0)))
            .unwrap_or(0.0)
    }

    /// `(cached_bytes, missed_bytes)`
    pub fn egress_bytes(&self) -> (u64, u64) {
        self.with_core(|core| {
            let totals = core.totals();
            Ok((totals.cached_bytes, totals.missed_bytes))
        })
        .unwrap_or((0, 0))
    }

    /// Per-shard counters, in shard order
    pub fn shard_stats(&self) -> Vec<ShardStats> {
        self.with_core(|core| Ok(core.shard_stats()))
            .unwrap_or_default()
    }

    /// Full snapshot for exposition
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.with_core(|core| {
            Ok(MetricsSnapshot::from_shards(
                &core.shard_stats(),
                core.admission.len() as u64,
                core.config.max_bytes,
                core.shard_budget,
            ))
        })
        .unwrap_or_default()
    }

    /// Live entries over all shards
    pub fn len(&self) -> usize {
        self.with_core(|core| Ok(core.totals().entries as usize))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys seen once and waiting for a second request
    pub fn tracked_admissions(&self) -> usize {
        self.with_core(|core| Ok(core.admission.len())).unwrap_or(0)
    }
}

// =============================================================================
// Tests
// =============================================================================
