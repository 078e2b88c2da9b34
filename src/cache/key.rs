//! Cache Key Canonicalization
//!
//! Turns the cache-relevant parts of a request into a stable string so that
//! semantically equivalent requests map to byte-identical keys.
//!
//! # Canonical Form
//!
//! ```text
//! METHOD:scheme://host path[?sorted-query]|vary:VARY
//! ```
//!
//! Missing method, scheme and path default to `GET`, `http` and `/`.
//! Query parameters are sorted by name with a stable sort, so repeated
//! names keep their relative order. Queries longer than
//! [`QUERY_SORT_LIMIT`] or with more than [`MAX_QUERY_PARAMS`] parameters
//! are kept verbatim and only match literally.

use std::borrow::Cow;

use super::hash::{hash_key, KeyHash};
use crate::error::{Error, Result};

/// Upper bound on the canonical key length in bytes (exclusive)
pub const MAX_KEY_LEN: usize = 2048;

/// Queries longer than this are not sorted
pub const QUERY_SORT_LIMIT: usize = 1024;

/// Queries with more parameters than this are not sorted
pub const MAX_QUERY_PARAMS: usize = 64;

/// Maximum length of the vary-relevant header value
pub const MAX_VARY_LEN: usize = 128;

const DEFAULT_METHOD: &str = "GET";
const DEFAULT_SCHEME: &str = "http";
const DEFAULT_PATH: &str = "/";

/// Cache-relevant view of a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestKey<'a> {
    /// HTTP method; empty means `GET`
    pub method: &'a str,
    /// URL scheme; empty means `http`
    pub scheme: &'a str,
    /// Host (from SNI / Host header)
    pub host: &'a str,
    /// Request path; empty means `/`
    pub path: &'a str,
    /// Raw query string without the leading `?`
    pub query: &'a str,
    /// Value of the header named by the response's `Vary`
    pub vary: &'a str,
}

impl<'a> RequestKey<'a> {
    /// Create a key without query or vary component
    pub fn new(method: &'a str, scheme: &'a str, host: &'a str, path: &'a str) -> Self {
        Self {
            method,
            scheme,
            host,
            path,
            query: "",
            vary: "",
        }
    }

    /// Set the raw query string
    pub fn with_query(mut self, query: &'a str) -> Self {
        self.query = query;
        self
    }

    /// Set the vary-relevant header value
    pub fn with_vary(mut self, vary: &'a str) -> Self {
        self.vary = vary;
        self
    }

    /// Build the canonical key string
    pub fn canonical(&self) -> Result<String> {
        build_cache_key(self)
    }

    /// Build the canonical key and hash it
    pub fn key_hash(&self) -> Result<KeyHash> {
        Ok(hash_key(&self.canonical()?))
    }
}

#[inline]
fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

/// Build the canonical key for a request.
///
/// Fails with [`Error::InvalidInput`] when the vary value is too long or
/// the resulting key would reach [`MAX_KEY_LEN`]; callers must then skip
/// both lookup and store.
pub fn build_cache_key(req: &RequestKey<'_>) -> Result<String> {
    if req.vary.len() > MAX_VARY_LEN {
        return Err(Error::InvalidInput(format!(
            "vary value of {} bytes exceeds {} bytes",
            req.vary.len(),
            MAX_VARY_LEN
        )));
    }

    let method = or_default(req.method, DEFAULT_METHOD);
    let scheme = or_default(req.scheme, DEFAULT_SCHEME);
    let path = or_default(req.path, DEFAULT_PATH);
    let query = normalize_query(req.query);

    let len = method.len()
        + 1
        + scheme.len()
        + 3
        + req.host.len()
        + path.len()
        + if query.is_empty() { 0 } else { query.len() + 1 }
        + 6
        + req.vary.len();
    if len >= MAX_KEY_LEN {
        return Err(Error::InvalidInput(format!(
            "canonical key of {} bytes exceeds {} bytes",
            len, MAX_KEY_LEN
        )));
    }

    let mut key = String::with_capacity(len);
    key.push_str(method);
    key.push(':');
    key.push_str(scheme);
    key.push_str("://");
    key.push_str(req.host);
    key.push_str(path);
    if !query.is_empty() {
        key.push('?');
        key.push_str(&query);
    }
    key.push_str("|vary:");
    key.push_str(req.vary);

    debug_assert_eq!(key.len(), len);
    Ok(key)
}

/// Sort query parameters by name.
///
/// Empty segments (`a=1&&b=2`, a lone `=`) are dropped and a parameter
/// with an empty value is written without `=`.
pub fn normalize_query(query: &str) -> Cow<'_, str> {
    if query.is_empty() {
        return Cow::Borrowed("");
    }
    if query.len() > QUERY_SORT_LIMIT {
        return Cow::Borrowed(query);
    }

    let mut params: Vec<(&str, &str)> = Vec::new();
    for segment in query.split('&').filter(|s| !s.is_empty() && *s != "=") {
        if params.len() == MAX_QUERY_PARAMS {
            return Cow::Borrowed(query);
        }
        params.push(segment.split_once('=').unwrap_or((segment, "")));
    }

    // Byte-wise comparison: shorter name wins when one is a prefix of the other
    params.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let mut out = String::with_capacity(query.len());
    for (i, (name, value)) in params.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(name);
        if !value.is_empty() {
            out.push('=');
            out.push_str(value);
        }
    }
    Cow::Owned(out)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn test_canonical_form() {
        let key = RequestKey::new("GET", "https", "example.com", "/a/b")
            .with_query("x=1")
            .with_vary("gzip");
        assert_eq!(
            key.canonical().unwrap(),
            "GET:https://example.com/a/b?x=1|vary:gzip"
        );
    }

    #[test]
    fn test_defaults_for_missing_parts() {
        let key = RequestKey::new("", "", "example.com", "");
        assert_eq!(key.canonical().unwrap(), "GET:http://example.com/|vary:");
    }

    #[test]
    fn test_query_order_is_normalized() {
        let a = RequestKey::new("GET", "http", "h", "/p").with_query("b=2&a=1");
        let b = RequestKey::new("GET", "http", "h", "/p").with_query("a=1&b=2");
        assert_eq!(a.canonical().unwrap(), b.canonical().unwrap());
        assert_eq!(a.canonical().unwrap(), "GET:http://h/p?a=1&b=2|vary:");
    }

    #[test]
    fn test_prefix_names_sort_shorter_first() {
        assert_eq!(normalize_query("ab=2&a=1"), "a=1&ab=2");
    }

    #[test]
    fn test_repeated_names_keep_relative_order() {
        assert_eq!(normalize_query("z=0&a=2&a=1"), "a=2&a=1&z=0");
    }

    #[test]
    fn test_empty_segments_and_values() {
        assert_eq!(normalize_query("b=&&a"), "a&b");
        assert_eq!(normalize_query("&&"), "");
        let key = RequestKey::new("GET", "http", "h", "/").with_query("&&");
        assert_eq!(key.canonical().unwrap(), "GET:http://h/|vary:");
    }

    #[test]
    fn test_value_keeps_later_equals_signs() {
        assert_eq!(normalize_query("t=a=b&s=1"), "s=1&t=a=b");
    }

    #[test]
    fn test_long_query_kept_verbatim() {
        let long: String = (0..300).map(|i| format!("k{}=v&", 300 - i)).collect();
        assert!(long.len() > QUERY_SORT_LIMIT);
        assert_eq!(normalize_query(&long), long.as_str());
    }

    #[test]
    fn test_too_many_params_kept_verbatim() {
        let query: String = (0..(MAX_QUERY_PARAMS + 1))
            .rev()
            .map(|i| format!("p{}=1", i))
            .collect::<Vec<_>>()
            .join("&");
        assert!(query.len() <= QUERY_SORT_LIMIT);
        assert_eq!(normalize_query(&query), query.as_str());
    }

    #[test]
    fn test_oversized_key_rejected() {
        let path = format!("/{}", "x".repeat(MAX_KEY_LEN));
        let key = RequestKey::new("GET", "http", "h", &path);
        assert_matches!(key.canonical(), Err(Error::InvalidInput(_)));
    }

    #[test]
    fn test_oversized_vary_rejected() {
        let vary = "v".repeat(MAX_VARY_LEN + 1);
        let key = RequestKey::new("GET", "http", "h", "/").with_vary(&vary);
        assert_matches!(key.canonical(), Err(Error::InvalidInput(_)));
    }

    #[test]
    fn test_vary_separates_keys() {
        let plain = RequestKey::new("GET", "http", "h", "/").with_vary("identity");
        let gzip = RequestKey::new("GET", "http", "h", "/").with_vary("gzip");
        assert_ne!(plain.key_hash().unwrap(), gzip.key_hash().unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Any permutation of distinct-named parameters yields the same key.
        #[test]
        fn prop_query_permutation_is_canonical(
            params in prop::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 1..12),
            seed in any::<u64>(),
        ) {
            let ordered: Vec<String> = params
                .iter()
                .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{}={}", k, v) })
                .collect();

            let mut shuffled = ordered.clone();
            // Deterministic Fisher-Yates driven by the seed
            let mut state = seed | 1;
            for i in (1..shuffled.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let j = (state % (i as u64 + 1)) as usize;
                shuffled.swap(i, j);
            }

            let a = ordered.join("&");
            let b = shuffled.join("&");
            let ka = RequestKey::new("GET", "http", "h", "/p").with_query(&a).canonical()?;
            let kb = RequestKey::new("GET", "http", "h", "/p").with_query(&b).canonical()?;
            prop_assert_eq!(ka, kb);
        }

        /// Normalizing twice changes nothing.
        #[test]
        fn prop_normalize_is_idempotent(query in "[a-z=&]{0,64}") {
            let once = normalize_query(&query).into_owned();
            let twice = normalize_query(&once).into_owned();
            prop_assert_eq!(once, twice);
        }
    }
}
