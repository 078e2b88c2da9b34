//! Key Hashing
//!
//! Maps a canonical cache key to a 64-bit routing hash and a 128-bit
//! identity fingerprint using two independent FNV-1a variants.
//!
//! # Design
//!
//! - The routing hash selects the shard from its low bits
//!   (`hash & (shards - 1)`) and the bucket from its high half
//!   (`(hash >> 32) % buckets`); collisions are expected
//! - The fingerprint is the equality check inside a bucket chain, so two
//!   keys that collide on the routing hash are still told apart by
//!   comparing 16 bytes instead of full key strings

use std::fmt;

const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

const FNV32_OFFSET: u64 = 0x811c_9dc5;
const FNV32_PRIME: u64 = 0x0100_0193;

/// FNV-1a over `bytes` with the standard 64-bit parameters
#[inline]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV64_OFFSET;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV64_PRIME);
    }
    hash
}

/// FNV-1a with the 32-bit offset basis and prime, accumulated in 64 bits.
///
/// Independent enough from [`fnv1a_64`] to serve as the second half of
/// the fingerprint.
#[inline]
pub fn fnv1a_32_wide(bytes: &[u8]) -> u64 {
    let mut hash = FNV32_OFFSET;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    hash
}

/// 128-bit identity fingerprint of a canonical key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint(u128);

impl Fingerprint {
    /// Build a fingerprint from its two 64-bit halves
    #[inline]
    pub const fn from_halves(primary: u64, secondary: u64) -> Self {
        Self(((primary as u128) << 64) | secondary as u128)
    }

    /// First half (the FNV-1a 64 value)
    #[inline]
    pub const fn primary(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// Second half (the 32-bit-parameter FNV-1a value)
    #[inline]
    pub const fn secondary(&self) -> u64 {
        self.0 as u64
    }

    /// Raw 128-bit value
    #[inline]
    pub const fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:032x})", self.0)
    }
}

/// Routing hash plus fingerprint for one canonical key.
///
/// Computed once per request and reused across `get`, `check_admission`
/// and `put`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyHash {
    /// Routing hash (shard and bucket selection)
    pub hash: u64,
    /// Identity fingerprint (bucket chain equality)
    pub fingerprint: Fingerprint,
}

impl KeyHash {
    /// Shard index for a power-of-two shard count
    #[inline]
    pub fn shard_index(&self, shard_count: usize) -> usize {
        shard_for(self.hash, shard_count)
    }
}

/// Hash a canonical key string
pub fn hash_key(canonical: &str) -> KeyHash {
    let bytes = canonical.as_bytes();
    let primary = fnv1a_64(bytes);
    let secondary = fnv1a_32_wide(bytes);
    KeyHash {
        hash: primary,
        fingerprint: Fingerprint::from_halves(primary, secondary),
    }
}

/// Shard index via bitmask; `shard_count` must be a power of two
#[inline]
pub fn shard_for(hash: u64, shard_count: usize) -> usize {
    debug_assert!(shard_count.is_power_of_two());
    (hash as usize) & (shard_count - 1)
}

/// Bucket index within a shard.
///
/// The low bits are already fixed by shard routing, so the bucket is taken
/// from the upper half of the hash.
#[inline]
pub fn bucket_for(hash: u64, bucket_count: usize) -> usize {
    ((hash >> 32) % bucket_count as u64) as usize
}

// =============================================================================
// Tests
// =============================================================================
