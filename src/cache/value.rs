//! Cached Response Values
//!
//! A [`CacheValue`] is the immutable stored form of one HTTP response. The
//! shard keeps it behind an `Arc`, so a hit hands the caller a shared
//! snapshot that stays valid after the shard lock is released, even if the
//! entry is overwritten or evicted in the meantime.

use bytes::Bytes;

/// Content type stored when the origin did not send one
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Longest content type, ETag or Last-Modified value kept (bytes)
pub const MAX_HEADER_VALUE_LEN: usize = 63;

/// Fixed per-value bookkeeping charged against the byte budget
pub const VALUE_OVERHEAD: u64 = std::mem::size_of::<CacheValue>() as u64;

/// Stored response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValue {
    body: Bytes,
    status: u16,
    content_type: String,
    expires_at: u64,
    etag: Option<String>,
    last_modified: Option<String>,
}

impl CacheValue {
    /// Build a stored value from response data and its absolute expiry
    pub fn from_response(response: ResponseData, expires_at: u64) -> Self {
        let content_type = response
            .content_type
            .as_deref()
            .filter(|ct| !ct.is_empty())
            .map(bounded)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        Self {
            body: response.body,
            status: response.status,
            content_type,
            expires_at,
            etag: response.etag.as_deref().map(bounded),
            last_modified: response.last_modified.as_deref().map(bounded),
        }
    }

    /// Response body (cheap to clone)
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body length in bytes
    #[inline]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// HTTP status code
    #[inline]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Content-Type header value
    #[inline]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Absolute expiry (epoch seconds)
    #[inline]
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// ETag carried from the origin response
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Last-Modified carried from the origin response
    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }

    /// An entry is expired once `now` reaches its expiry second
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

/// Truncate to [`MAX_HEADER_VALUE_LEN`] bytes on a char boundary
fn bounded(value: &str) -> String {
    if value.len() <= MAX_HEADER_VALUE_LEN {
        return value.to_string();
    }
    let mut end = MAX_HEADER_VALUE_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Response handed to `put`
#[derive(Debug, Clone, Default)]
pub struct ResponseData {
    /// HTTP status code
    pub status: u16,
    /// Full response body
    pub body: Bytes,
    /// Content-Type; `text/plain` when absent
    pub content_type: Option<String>,
    /// Time to live; 0 selects the engine's default TTL
    pub ttl_secs: u64,
    /// ETag header value
    pub etag: Option<String>,
    /// Last-Modified header value
    pub last_modified: Option<String>,
}

impl ResponseData {
    /// Create response data with the default TTL
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            ..Default::default()
        }
    }

    /// Set the content type
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the TTL in seconds (0 = engine default)
    pub fn ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Set the ETag
    pub fn etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Set Last-Modified
    pub fn last_modified(mut self, last_modified: impl Into<String>) -> Self {
        self.last_modified = Some(last_modified.into());
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
