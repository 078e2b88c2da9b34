//! Error types for the proxy response cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the response cache
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Cache Engine Errors
    // =========================================================================
    /// Operation attempted before `init` or after `shutdown`
    #[error("Cache is not initialized")]
    NotInitialized,

    /// A required field was empty or the canonical key could not be built
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Response body exceeds the configured maximum object size
    #[error("Object of {size} bytes exceeds maximum object size of {max} bytes")]
    ObjectTooLarge { size: usize, max: usize },

    /// Memory could not be reserved for a new entry
    #[error("Allocation failed while inserting cache entry")]
    AllocationFailure,

    /// No entry matched the key (invalidate only; a lookup miss is not an error)
    #[error("Cache entry not found")]
    NotFound,

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    /// Prometheus registry or encoder error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the request path should treat this error as a plain miss.
    ///
    /// Cache failures never reach the HTTP client; they degrade to fetching
    /// from the backend. Only configuration and exposition failures are
    /// outside the request path.
    pub fn is_cache_miss_equivalent(&self) -> bool {
        matches!(
            self,
            Error::NotInitialized
                | Error::InvalidInput(_)
                | Error::ObjectTooLarge { .. }
                | Error::AllocationFailure
                | Error::NotFound
        )
    }
}
