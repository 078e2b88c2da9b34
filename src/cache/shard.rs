//! Cache Shard
//!
//! One independently locked partition of the cache: a chained hash table
//! for lookup plus a doubly linked LRU list for eviction, both threaded
//! through the same entries.
//!
//! # Design
//!
//! - Entries live in an index arena (`slots`) with a free list; the hash
//!   chain and LRU links are kept in a parallel `links` array so that
//!   relinking never touches the entry payload
//! - Every live entry is on exactly one bucket chain and on the LRU list
//! - `bytes_used` is the sum of the accounted sizes of live entries and
//!   never goes below zero
//! - Eviction always takes the LRU tail and is bounded per pass; the
//!   entry just written is never its own victim
//! - Bodies must be non-empty, within the object limit, and small enough
//!   to fit the shard budget on their own

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use super::hash::{bucket_for, Fingerprint};
use super::metrics::ShardStats;
use super::value::{CacheValue, VALUE_OVERHEAD};
use super::DEFAULT_MAX_OBJECT_BYTES;
use crate::error::{Error, Result};

/// No single eviction pass removes more entries than this
pub const EVICTION_SAFETY_CAP: usize = 100;

/// First eviction stage target, in percent of the shard budget
pub const STAGE_ONE_TARGET_PCT: u64 = 90;
/// Evictions allowed in the first stage
pub const STAGE_ONE_MAX_EVICTIONS: usize = 10;
/// Second eviction stage target, in percent of the shard budget
pub const STAGE_TWO_TARGET_PCT: u64 = 80;
/// Additional evictions allowed in the second stage
pub const STAGE_TWO_MAX_EVICTIONS: usize = 20;

/// Fixed per-entry bookkeeping charged against the byte budget
pub const ENTRY_OVERHEAD: u64 =
    (std::mem::size_of::<Entry>() + std::mem::size_of::<Links>()) as u64;

/// Bytes charged against the budget for a body of `body_len` bytes
#[inline]
pub const fn accounted_size(body_len: usize) -> u64 {
    ENTRY_OVERHEAD + VALUE_OVERHEAD + body_len as u64
}

/// `pct` percent of `budget`, rounded down
#[inline]
pub(crate) fn percent_of(budget: u64, pct: u64) -> u64 {
    (budget as u128 * pct as u128 / 100) as u64
}

type Link = Option<usize>;

#[derive(Debug, Clone, Copy, Default)]
struct Links {
    hash_next: Link,
    lru_prev: Link,
    lru_next: Link,
}

#[derive(Debug)]
struct Entry {
    hash: u64,
    fingerprint: Fingerprint,
    value: Arc<CacheValue>,
    accounted: u64,
    created_at: u64,
}

/// Result of a successful `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new entry was linked in
    Inserted { evicted: usize },
    /// An existing entry's value was replaced in place
    Replaced { evicted: usize },
}

impl PutOutcome {
    /// Entries evicted to make room
    pub fn evicted(&self) -> usize {
        match self {
            PutOutcome::Inserted { evicted } | PutOutcome::Replaced { evicted } => *evicted,
        }
    }
}

/// Unlocked shard contents
#[derive(Debug)]
pub struct ShardTable {
    buckets: Vec<Link>,
    slots: Vec<Option<Entry>>,
    links: Vec<Links>,
    free: Vec<usize>,
    lru_head: Link,
    lru_tail: Link,
    len: usize,
    max_object_bytes: usize,
    stats: ShardStats,
}

impl ShardTable {
    /// Create an empty table with `bucket_count` chains and the default
    /// object limit
    pub fn new(bucket_count: usize) -> Self {
        Self::with_max_object(bucket_count, DEFAULT_MAX_OBJECT_BYTES)
    }

    /// Create an empty table that rejects bodies over `max_object_bytes`
    pub fn with_max_object(bucket_count: usize, max_object_bytes: usize) -> Self {
        Self {
            buckets: vec![None; bucket_count.max(1)],
            slots: Vec::new(),
            links: Vec::new(),
            free: Vec::new(),
            lru_head: None,
            lru_tail: None,
            len: 0,
            max_object_bytes,
            stats: ShardStats::default(),
        }
    }

    /// Largest body `put` accepts
    pub fn max_object_bytes(&self) -> usize {
        self.max_object_bytes
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Accounted bytes of live entries
    pub fn bytes_used(&self) -> u64 {
        self.stats.bytes_used
    }

    /// Counter snapshot
    pub fn stats(&self) -> ShardStats {
        ShardStats {
            entries: self.len as u64,
            ..self.stats
        }
    }

    /// Look up an entry, promoting it on a hit.
    ///
    /// An entry whose expiry has been reached is removed and the lookup
    /// counts as a miss.
    pub fn get(&mut self, hash: u64, fingerprint: Fingerprint, now: u64) -> Option<Arc<CacheValue>> {
        let found = self.find(hash, fingerprint).and_then(|idx| {
            self.slots[idx]
                .as_ref()
                .map(|entry| (idx, Arc::clone(&entry.value)))
        });

        let Some((idx, value)) = found else {
            self.stats.misses += 1;
            return None;
        };

        if value.is_expired(now) {
            self.remove(idx);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            trace!(hash, expires_at = value.expires_at(), now, "expired entry dropped");
            return None;
        }

        self.lru_promote(idx);
        self.stats.hits += 1;
        self.stats.cached_bytes += value.body_len() as u64;
        Some(value)
    }

    /// Store a value, replacing any entry with the same fingerprint.
    ///
    /// `budget` is this shard's byte budget; exceeding it triggers the
    /// two-stage eviction, which never removes the entry being written.
    /// A body that could not fit the budget even in an empty shard is
    /// rejected with `ObjectTooLarge` before anything is touched. A budget
    /// of 0 disables eviction.
    pub fn put(
        &mut self,
        hash: u64,
        fingerprint: Fingerprint,
        value: CacheValue,
        now: u64,
        budget: u64,
    ) -> Result<PutOutcome> {
        let size = self.check_size(value.body_len(), budget)?;

        if let Some(idx) = self.find(hash, fingerprint) {
            if let Some(entry) = self.slots[idx].as_mut() {
                let old = entry.accounted;
                entry.value = Arc::new(value);
                entry.accounted = size;
                self.stats.bytes_used = self.stats.bytes_used.saturating_sub(old) + size;
                self.lru_promote(idx);
                let evicted = self.enforce_budget(budget, idx);
                return Ok(PutOutcome::Replaced { evicted });
            }
        }

        let idx = self.allocate_slot()?;
        self.slots[idx] = Some(Entry {
            hash,
            fingerprint,
            value: Arc::new(value),
            accounted: size,
            created_at: now,
        });

        let bucket = self.bucket_of(hash);
        self.links[idx] = Links {
            hash_next: self.buckets[bucket],
            lru_prev: None,
            lru_next: None,
        };
        self.buckets[bucket] = Some(idx);
        self.lru_push_head(idx);

        self.len += 1;
        self.stats.inserts += 1;
        self.stats.bytes_used += size;

        let evicted = self.enforce_budget(budget, idx);
        Ok(PutOutcome::Inserted { evicted })
    }

    /// Remove an entry by identity, returning its value
    pub fn invalidate(&mut self, hash: u64, fingerprint: Fingerprint) -> Option<Arc<CacheValue>> {
        let idx = self.find(hash, fingerprint)?;
        self.remove(idx).map(|entry| entry.value)
    }

    /// Evict from the LRU tail until `bytes_used <= target` or `max`
    /// entries are gone. Returns the number evicted.
    pub fn evict_until(&mut self, target: u64, max: usize) -> usize {
        self.evict_tail(target, max, None)
    }

    /// Tail eviction that stops short of `keep`
    fn evict_tail(&mut self, target: u64, max: usize, keep: Link) -> usize {
        let max = max.min(EVICTION_SAFETY_CAP);
        let mut evicted = 0;
        while self.stats.bytes_used > target && evicted < max {
            let Some(tail) = self.lru_tail else { break };
            if keep == Some(tail) || self.remove(tail).is_none() {
                break;
            }
            evicted += 1;
        }
        self.stats.evictions += evicted as u64;
        evicted
    }

    /// Two-stage eviction after writing slot `written`
    fn enforce_budget(&mut self, budget: u64, written: usize) -> usize {
        if budget == 0 || self.stats.bytes_used <= budget {
            return 0;
        }
        let keep = Some(written);
        let mut evicted = self.evict_tail(
            percent_of(budget, STAGE_ONE_TARGET_PCT),
            STAGE_ONE_MAX_EVICTIONS,
            keep,
        );
        if self.stats.bytes_used > budget {
            evicted += self.evict_tail(
                percent_of(budget, STAGE_TWO_TARGET_PCT),
                STAGE_TWO_MAX_EVICTIONS,
                keep,
            );
        }
        evicted
    }

    /// Accounted size of a body, or why it cannot be stored
    fn check_size(&self, body_len: usize, budget: u64) -> Result<u64> {
        if body_len == 0 {
            return Err(Error::InvalidInput("response body is empty".into()));
        }
        if body_len > self.max_object_bytes {
            return Err(Error::ObjectTooLarge {
                size: body_len,
                max: self.max_object_bytes,
            });
        }
        let size = accounted_size(body_len);
        if budget > 0 && size > budget {
            let fits = budget.saturating_sub(accounted_size(0));
            return Err(Error::ObjectTooLarge {
                size: body_len,
                max: usize::try_from(fits).unwrap_or(usize::MAX),
            });
        }
        Ok(size)
    }

    /// Record bytes fetched from the backend for a miss
    pub fn record_byte_miss(&mut self, bytes: u64) {
        self.stats.missed_bytes += bytes;
    }

    /// Drop every entry; counters other than `bytes_used` are kept
    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.slots.clear();
        self.links.clear();
        self.free.clear();
        self.lru_head = None;
        self.lru_tail = None;
        self.len = 0;
        self.stats.bytes_used = 0;
    }

    /// Age in seconds of the entry for `fingerprint`, if present
    pub fn entry_age(&self, hash: u64, fingerprint: Fingerprint, now: u64) -> Option<u64> {
        let idx = self.find(hash, fingerprint)?;
        self.slots[idx]
            .as_ref()
            .map(|entry| now.saturating_sub(entry.created_at))
    }

    /// Fingerprints from most to least recently used
    pub fn lru_order(&self) -> Vec<Fingerprint> {
        let mut order = Vec::with_capacity(self.len);
        let mut cursor = self.lru_head;
        while let Some(idx) = cursor {
            if let Some(entry) = &self.slots[idx] {
                order.push(entry.fingerprint);
            }
            cursor = self.links[idx].lru_next;
        }
        order
    }

    /// Cross-check the structural invariants.
    ///
    /// Walks every chain and the LRU list in both directions and verifies
    /// that byte and entry accounting match what is actually linked.
    pub fn audit(&self) -> Result<()> {
        let mut chained = 0;
        let mut accounted = 0u64;
        for (bucket, head) in self.buckets.iter().enumerate() {
            let mut cursor = *head;
            while let Some(idx) = cursor {
                let entry = self.slots[idx]
                    .as_ref()
                    .ok_or_else(|| Error::Internal(format!("bucket {} links free slot {}", bucket, idx)))?;
                if self.bucket_of(entry.hash) != bucket {
                    return Err(Error::Internal(format!("slot {} chained in wrong bucket", idx)));
                }
                chained += 1;
                accounted += entry.accounted;
                if chained > self.slots.len() {
                    return Err(Error::Internal("cycle in bucket chain".into()));
                }
                cursor = self.links[idx].hash_next;
            }
        }

        let mut forward = 0;
        let mut prev = None;
        let mut cursor = self.lru_head;
        while let Some(idx) = cursor {
            if self.links[idx].lru_prev != prev {
                return Err(Error::Internal(format!("broken LRU back link at slot {}", idx)));
            }
            forward += 1;
            if forward > self.slots.len() {
                return Err(Error::Internal("cycle in LRU list".into()));
            }
            prev = Some(idx);
            cursor = self.links[idx].lru_next;
        }
        if prev != self.lru_tail {
            return Err(Error::Internal("LRU tail does not match last node".into()));
        }

        if chained != self.len || forward != self.len {
            return Err(Error::Internal(format!(
                "entry count {} but {} chained and {} on LRU list",
                self.len, chained, forward
            )));
        }
        if accounted != self.stats.bytes_used {
            return Err(Error::Internal(format!(
                "bytes_used {} but live entries account for {}",
                self.stats.bytes_used, accounted
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    #[inline]
    fn bucket_of(&self, hash: u64) -> usize {
        bucket_for(hash, self.buckets.len())
    }

    fn find(&self, hash: u64, fingerprint: Fingerprint) -> Option<usize> {
        let mut cursor = self.buckets[self.bucket_of(hash)];
        while let Some(idx) = cursor {
            if let Some(entry) = &self.slots[idx] {
                if entry.hash == hash && entry.fingerprint == fingerprint {
                    return Some(idx);
                }
            }
            cursor = self.links[idx].hash_next;
        }
        None
    }

    fn allocate_slot(&mut self) -> Result<usize> {
        if let Some(idx) = self.free.pop() {
            return Ok(idx);
        }
        self.slots
            .try_reserve(1)
            .map_err(|_| Error::AllocationFailure)?;
        self.links
            .try_reserve(1)
            .map_err(|_| Error::AllocationFailure)?;
        self.slots.push(None);
        self.links.push(Links::default());
        Ok(self.slots.len() - 1)
    }

    /// Unlink from both structures and release the slot
    fn remove(&mut self, idx: usize) -> Option<Entry> {
        let entry = self.slots[idx].take()?;
        self.chain_unlink(self.bucket_of(entry.hash), idx);
        self.lru_unlink(idx);
        self.links[idx] = Links::default();
        self.free.push(idx);
        self.len -= 1;
        self.stats.bytes_used = self.stats.bytes_used.saturating_sub(entry.accounted);
        Some(entry)
    }

    fn chain_unlink(&mut self, bucket: usize, idx: usize) {
        let next = self.links[idx].hash_next;
        if self.buckets[bucket] == Some(idx) {
            self.buckets[bucket] = next;
            return;
        }
        let mut cursor = self.buckets[bucket];
        while let Some(cur) = cursor {
            if self.links[cur].hash_next == Some(idx) {
                self.links[cur].hash_next = next;
                return;
            }
            cursor = self.links[cur].hash_next;
        }
    }

    fn lru_unlink(&mut self, idx: usize) {
        let Links {
            lru_prev, lru_next, ..
        } = self.links[idx];
        match lru_prev {
            Some(prev) => self.links[prev].lru_next = lru_next,
            None => self.lru_head = lru_next,
        }
        match lru_next {
            Some(next) => self.links[next].lru_prev = lru_prev,
            None => self.lru_tail = lru_prev,
        }
        self.links[idx].lru_prev = None;
        self.links[idx].lru_next = None;
    }

    fn lru_push_head(&mut self, idx: usize) {
        self.links[idx].lru_prev = None;
        self.links[idx].lru_next = self.lru_head;
        match self.lru_head {
            Some(head) => self.links[head].lru_prev = Some(idx),
            None => self.lru_tail = Some(idx),
        }
        self.lru_head = Some(idx);
    }

    fn lru_promote(&mut self, idx: usize) {
        if self.lru_head == Some(idx) {
            return;
        }
        self.lru_unlink(idx);
        self.lru_push_head(idx);
    }
}

/// Lock-protected shard.
///
/// Lookups take the write lock as well, since a hit relinks the LRU list;
/// read mode is only used for metrics.
#[derive(Debug)]
pub struct Shard {
    table: RwLock<ShardTable>,
}

impl Shard {
    /// Create an empty shard with `bucket_count` chains
    pub fn new(bucket_count: usize, max_object_bytes: usize) -> Self {
        Self {
            table: RwLock::new(ShardTable::with_max_object(bucket_count, max_object_bytes)),
        }
    }

    /// Exclusive access for lookups and mutations
    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, ShardTable> {
        self.table.write()
    }

    /// Shared access for metrics
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, ShardTable> {
        self.table.read()
    }

    /// Counter snapshot under a read lock
    pub fn stats(&self) -> ShardStats {
        self.table.read().stats()
    }
}

// =============================================================================
// Tests
// =============================================================================
