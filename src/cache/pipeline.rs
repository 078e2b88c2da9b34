//! Request-Path Pipeline
//!
//! The caller side of the cache: decide whether a request may use the
//! cache, serve hits, gate misses through the admission tracker and store
//! admitted backend responses.
//!
//! ```text
//! request ──► policy ──► get ──hit──► Serve
//!               │          └─miss─► check_admission ──► Fetch { ticket }
//!               └─not cacheable───────────────────────► Bypass
//!
//! backend response + Fetch ──► track_byte_miss ──► policy ──► put
//! ```
//!
//! Cache errors never surface to the client: they degrade to a fetch.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use super::engine::{CacheEngine, Lookup};
use super::hash::KeyHash;
use super::policy::{CacheabilityPolicy, RequestInfo, ResponseInfo, Uncacheable};
use super::value::{CacheValue, ResponseData};

/// Proof that the admission tracker admitted a key
#[derive(Debug)]
pub struct StoreTicket {
    _private: (),
}

/// A miss that must be fetched from the backend
#[derive(Debug)]
pub struct Fetch {
    key: KeyHash,
    ticket: Option<StoreTicket>,
}

impl Fetch {
    /// Key computed for the request
    pub fn key(&self) -> &KeyHash {
        &self.key
    }

    /// The response may be stored once fetched
    pub fn is_admitted(&self) -> bool {
        self.ticket.is_some()
    }
}

/// What to do with a request
#[derive(Debug)]
pub enum Decision {
    /// Answer from cache
    Serve(Arc<CacheValue>),
    /// Go to the backend; store the response only if admitted
    Fetch(Fetch),
    /// Go to the backend and leave the cache alone
    Bypass(Uncacheable),
}

/// Cache front for a proxy worker
#[derive(Debug, Clone)]
pub struct CachePipeline {
    engine: Arc<CacheEngine>,
    policy: CacheabilityPolicy,
}

impl CachePipeline {
    pub fn new(engine: Arc<CacheEngine>, policy: CacheabilityPolicy) -> Self {
        Self { engine, policy }
    }

    /// Build the policy from the engine's active configuration
    pub fn for_engine(engine: Arc<CacheEngine>) -> Self {
        let policy = engine
            .config()
            .map(|config| CacheabilityPolicy::from_config(&config))
            .unwrap_or_else(|| CacheabilityPolicy::from_config(&Default::default()));
        Self::new(engine, policy)
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    /// Decide how to handle a request
    pub fn lookup(&self, request: &RequestInfo<'_>) -> Decision {
        if let Err(reason) = self.policy.check_request(request) {
            trace!(path = request.key.path, %reason, "cache bypass");
            return Decision::Bypass(reason);
        }

        let key = match request.key.key_hash() {
            Ok(key) => key,
            Err(e) => {
                debug!(path = request.key.path, error = %e, "cache key rejected");
                return Decision::Bypass(Uncacheable::InvalidKey);
            }
        };

        match self.engine.get_hashed(&key) {
            Ok(Lookup::Hit(value)) => Decision::Serve(value),
            Ok(Lookup::Miss) => {
                let ticket = self
                    .engine
                    .check_admission(&key)
                    .then_some(StoreTicket { _private: () });
                trace!(admitted = ticket.is_some(), "cache miss");
                Decision::Fetch(Fetch { key, ticket })
            }
            Err(e) => {
                trace!(error = %e, "cache unavailable");
                Decision::Fetch(Fetch { key, ticket: None })
            }
        }
    }

    /// Hand the backend response for a miss back to the cache.
    ///
    /// Returns true if the response was stored.
    pub fn complete(&self, fetch: Fetch, response: &ResponseInfo, body: Bytes) -> bool {
        self.engine.track_byte_miss(&fetch.key, body.len() as u64);

        if fetch.ticket.is_none() {
            return false;
        }

        let expected = match self.policy.check_response(response) {
            Ok(len) => len,
            Err(reason) => {
                trace!(%reason, "response not stored");
                return false;
            }
        };
        if body.len() != expected {
            let reason = Uncacheable::Incomplete {
                expected: expected as u64,
                received: body.len(),
            };
            debug!(%reason, "response not stored");
            return false;
        }

        let data = ResponseData {
            status: response.status,
            body,
            content_type: response.content_type.clone(),
            ttl_secs: response.ttl_secs,
            etag: response.etag.clone(),
            last_modified: response.last_modified.clone(),
        };
        match self.engine.put_hashed(&fetch.key, data) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "cache store failed");
                false
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
