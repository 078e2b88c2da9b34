//! Admission Tracker
//!
//! Second-hit gating: a response is only stored once its key has been
//! requested twice within the admission window. One-hit wonders never
//! displace useful entries.
//!
//! # Design
//!
//! - Sharded the same way as the cache (`hash & (shards - 1)`), each shard
//!   behind its own mutex
//! - Each call takes a fixed number of sweep steps from a rotating
//!   (bucket, offset) cursor; a step examines one sighting or skips past
//!   the end of a bucket, so cleanup cost per call is constant. Stale
//!   sightings can outlive the window until the cursor comes round
//! - An admission consumes the sighting, so the next miss starts over

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;

use super::hash::{bucket_for, Fingerprint, KeyHash};

/// Sweep steps per `check` call: sightings examined plus bucket ends skipped
pub const ADMISSION_CLEANUP_BUDGET: usize = 10;

#[derive(Debug, Clone, Copy)]
struct Sighting {
    hash: u64,
    fingerprint: Fingerprint,
    first_seen_at: u64,
}

/// One lock's worth of sightings
#[derive(Debug)]
pub struct TrackerShard {
    buckets: Vec<Vec<Sighting>>,
    cursor: usize,
    offset: usize,
    len: usize,
}

impl TrackerShard {
    /// Create an empty tracker shard with `bucket_count` buckets
    pub fn new(bucket_count: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); bucket_count.max(1)],
            cursor: 0,
            offset: 0,
            len: 0,
        }
    }

    /// Sightings currently held
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Apply the second-hit rule for `key` at time `now`
    pub fn check(&mut self, key: &KeyHash, now: u64, window: u64) -> bool {
        self.sweep(now, window);

        let idx = bucket_for(key.hash, self.buckets.len());
        let bucket = &mut self.buckets[idx];
        let existing = bucket
            .iter()
            .position(|s| s.hash == key.hash && s.fingerprint == key.fingerprint);

        match existing {
            Some(pos) if now.saturating_sub(bucket[pos].first_seen_at) <= window => {
                bucket.swap_remove(pos);
                self.len -= 1;
                true
            }
            Some(pos) => {
                bucket[pos].first_seen_at = now;
                false
            }
            None => {
                bucket.push(Sighting {
                    hash: key.hash,
                    fingerprint: key.fingerprint,
                    first_seen_at: now,
                });
                self.len += 1;
                false
            }
        }
    }

    /// Examine the next few sightings and drop the stale ones; returns
    /// how many were dropped
    fn sweep(&mut self, now: u64, window: u64) -> usize {
        let mut removed = 0;
        let count = self.buckets.len();
        for _ in 0..ADMISSION_CLEANUP_BUDGET {
            let bucket = &mut self.buckets[self.cursor];
            if self.offset >= bucket.len() {
                self.cursor = (self.cursor + 1) % count;
                self.offset = 0;
                continue;
            }
            if now.saturating_sub(bucket[self.offset].first_seen_at) > window {
                // The swapped-in sighting is examined by the next step
                bucket.swap_remove(self.offset);
                removed += 1;
            } else {
                self.offset += 1;
            }
        }
        self.len -= removed;
        removed
    }

    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(Vec::clear);
        self.cursor = 0;
        self.offset = 0;
        self.len = 0;
    }
}

/// Sharded second-hit tracker
#[derive(Debug)]
pub struct AdmissionTracker {
    shards: Box<[CachePadded<Mutex<TrackerShard>>]>,
    window_secs: u64,
}

impl AdmissionTracker {
    /// `shard_count` must be a power of two
    pub fn new(shard_count: usize, bucket_count: usize, window_secs: u64) -> Self {
        let shards = (0..shard_count)
            .map(|_| CachePadded::new(Mutex::new(TrackerShard::new(bucket_count))))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            window_secs,
        }
    }

    /// Admission window in seconds
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// True when `key` was already seen within the window
    pub fn check(&self, key: &KeyHash, now: u64) -> bool {
        let shard = &self.shards[key.shard_index(self.shards.len())];
        shard.lock().check(key, now, self.window_secs)
    }

    /// Total sightings held across shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.lock().clear();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
