//! Cacheability Policy
//!
//! Caller-side preconditions: which requests may consult the cache and
//! which backend responses may be stored. The engine itself trusts its
//! callers and only enforces the size limit.

use std::fmt;

use super::config::CacheConfig;
use super::key::RequestKey;

/// Why a request or response was kept out of the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uncacheable {
    /// Only GET is cached
    Method,
    /// Requests carrying credentials are never shared
    Authorization,
    /// The canonical key could not be built
    InvalidKey,
    /// Only 200 responses are stored
    Status(u16),
    /// Chunked bodies have no up-front length
    Chunked,
    /// Content-Length missing or negative
    UnknownLength,
    /// Empty body
    Empty,
    /// Body larger than the configured maximum
    TooLarge { size: u64, max: usize },
    /// Received body does not match Content-Length
    Incomplete { expected: u64, received: usize },
}

impl fmt::Display for Uncacheable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uncacheable::Method => write!(f, "method is not GET"),
            Uncacheable::Authorization => write!(f, "request carries Authorization"),
            Uncacheable::InvalidKey => write!(f, "cache key could not be built"),
            Uncacheable::Status(status) => write!(f, "status {} is not cacheable", status),
            Uncacheable::Chunked => write!(f, "chunked response"),
            Uncacheable::UnknownLength => write!(f, "no usable Content-Length"),
            Uncacheable::Empty => write!(f, "empty body"),
            Uncacheable::TooLarge { size, max } => {
                write!(f, "body of {} bytes exceeds {} bytes", size, max)
            }
            Uncacheable::Incomplete { expected, received } => {
                write!(f, "received {} of {} body bytes", received, expected)
            }
        }
    }
}

/// Request as seen by the cache
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestInfo<'a> {
    /// Cache-relevant request parts
    pub key: RequestKey<'a>,
    /// An `Authorization` header is present
    pub has_authorization: bool,
}

impl<'a> RequestInfo<'a> {
    pub fn new(key: RequestKey<'a>) -> Self {
        Self {
            key,
            has_authorization: false,
        }
    }

    /// Derive the authorization flag from the raw header block
    pub fn with_headers(mut self, header_block: &str) -> Self {
        self.has_authorization = has_authorization(header_block);
        self
    }
}

/// Backend response metadata as parsed by the caller
#[derive(Debug, Clone, Default)]
pub struct ResponseInfo {
    pub status: u16,
    /// `Transfer-Encoding: chunked`
    pub chunked: bool,
    /// Parsed Content-Length; `None` when absent or unparsable
    pub content_length: Option<i64>,
    pub content_type: Option<String>,
    /// 0 = engine default
    pub ttl_secs: u64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ResponseInfo {
    /// Non-chunked response with a known length
    pub fn new(status: u16, content_length: i64) -> Self {
        Self {
            status,
            content_length: Some(content_length),
            ..Default::default()
        }
    }
}

/// True if the header block contains an `Authorization` header.
///
/// Only lines before the first blank line are considered; the name match
/// ignores ASCII case.
pub fn has_authorization(header_block: &str) -> bool {
    header_block
        .lines()
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .any(|(name, _)| name.trim().eq_ignore_ascii_case("authorization"))
}

/// Preconditions for lookup and store
#[derive(Debug, Clone, Copy)]
pub struct CacheabilityPolicy {
    max_object_bytes: usize,
}

impl CacheabilityPolicy {
    pub fn new(max_object_bytes: usize) -> Self {
        Self { max_object_bytes }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_object_bytes)
    }

    /// May this request be served from or stored into the cache?
    pub fn check_request(&self, request: &RequestInfo<'_>) -> Result<(), Uncacheable> {
        let method = request.key.method;
        if !(method.is_empty() || method == "GET") {
            return Err(Uncacheable::Method);
        }
        if request.has_authorization {
            return Err(Uncacheable::Authorization);
        }
        Ok(())
    }

    /// May this response be stored? Returns the body length on success.
    pub fn check_response(&self, response: &ResponseInfo) -> Result<usize, Uncacheable> {
        if response.status != 200 {
            return Err(Uncacheable::Status(response.status));
        }
        if response.chunked {
            return Err(Uncacheable::Chunked);
        }
        let length = match response.content_length {
            Some(n) if n >= 0 => n as u64,
            _ => return Err(Uncacheable::UnknownLength),
        };
        if length == 0 {
            return Err(Uncacheable::Empty);
        }
        if length > self.max_object_bytes as u64 {
            return Err(Uncacheable::TooLarge {
                size: length,
                max: self.max_object_bytes,
            });
        }
        Ok(length as usize)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CacheabilityPolicy {
        CacheabilityPolicy::new(1024)
    }

    #[test]
    fn test_has_authorization() {
        assert!(has_authorization("Host: a\r\nAuthorization: Basic x\r\n\r\n"));
        assert!(has_authorization("host: a\r\nauthorization: Bearer y\r\n"));
        assert!(has_authorization("AUTHORIZATION: z"));
        assert!(!has_authorization("Host: a\r\nX-Authorization-Hint: no\r\n\r\n"));
        // Body text after the header block does not count
        assert!(!has_authorization("Host: a\r\n\r\nAuthorization: in body"));
        assert!(!has_authorization(""));
    }

    #[test]
    fn test_request_checks() {
        let get = RequestInfo::new(RequestKey::new("GET", "https", "h", "/"));
        assert_eq!(policy().check_request(&get), Ok(()));

        let implicit = RequestInfo::new(RequestKey::new("", "https", "h", "/"));
        assert_eq!(policy().check_request(&implicit), Ok(()));

        let post = RequestInfo::new(RequestKey::new("POST", "https", "h", "/"));
        assert_eq!(policy().check_request(&post), Err(Uncacheable::Method));

        let authed = RequestInfo::new(RequestKey::new("GET", "https", "h", "/"))
            .with_headers("Authorization: Basic abc\r\n\r\n");
        assert_eq!(policy().check_request(&authed), Err(Uncacheable::Authorization));
    }

    #[test]
    fn test_response_checks() {
        assert_eq!(policy().check_response(&ResponseInfo::new(200, 10)), Ok(10));
        assert_eq!(
            policy().check_response(&ResponseInfo::new(404, 10)),
            Err(Uncacheable::Status(404))
        );
        assert_eq!(
            policy().check_response(&ResponseInfo::new(200, -1)),
            Err(Uncacheable::UnknownLength)
        );
        assert_eq!(
            policy().check_response(&ResponseInfo::new(200, 0)),
            Err(Uncacheable::Empty)
        );
        assert_eq!(
            policy().check_response(&ResponseInfo::new(200, 1025)),
            Err(Uncacheable::TooLarge { size: 1025, max: 1024 })
        );

        let mut chunked = ResponseInfo::new(200, 10);
        chunked.chunked = true;
        assert_eq!(policy().check_response(&chunked), Err(Uncacheable::Chunked));

        let missing = ResponseInfo {
            status: 200,
            ..Default::default()
        };
        assert_eq!(policy().check_response(&missing), Err(Uncacheable::UnknownLength));
    }

    #[test]
    fn test_display() {
        assert_eq!(Uncacheable::Status(500).to_string(), "status 500 is not cacheable");
    }
}
