//! Error types for the pollsync resilience layer

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pollsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the library
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Locally detected bad input; never reaches the network.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this failure should be shown to the user as an explicit,
    /// addressable message rather than a transient warning.
    pub fn is_permanent(&self) -> bool {
        match self {
            Error::Api(api) => api.is_permanent(),
            Error::Validation(_) => true,
            _ => false,
        }
    }
}

/// A single field-level validation message returned by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Remote call failures.
///
/// `Clone` so that one in-flight result can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Could not reach the server (DNS, connect, abort)
    #[error("Network error: {0}")]
    Transport(String),

    /// The per-attempt deadline elapsed and the attempt was cancelled
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Server reachable but rejected the request
    #[error("Server returned {status}: {message}")]
    Service {
        status: u16,
        message: String,
        field_errors: Vec<FieldError>,
    },

    #[error("Rate limit exceeded. Retry after {0:?}")]
    RateLimited(Duration),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Transport-level fault: the request never got a response.
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::Timeout(_))
    }

    /// Only transport faults are retried inside the gateway.
    pub fn is_retryable(&self) -> bool {
        self.is_transport()
    }

    /// HTTP status carried by the fault, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Service { status, .. } => Some(*status),
            ApiError::RateLimited(_) => Some(429),
            _ => None,
        }
    }

    /// 4xx rejections other than 408/429 will fail the same way on every retry.
    pub fn is_permanent(&self) -> bool {
        match self.status() {
            Some(408) | Some(429) => false,
            Some(status) => (400..500).contains(&status),
            None => false,
        }
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ApiError::Service { field_errors, .. } => field_errors,
            _ => &[],
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Transport("Request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Transport("Failed to connect to API".to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Persistent store failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Store database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store I/O error: {0}")]
    Io(String),

    #[error("Failed to (de)serialize stored value for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Could not determine a data directory for the store")]
    NoDataDir,

    #[error("Store quota exceeded while writing {0}")]
    QuotaExceeded(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to save configuration: {0}")]
    SaveError(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
