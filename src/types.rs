//! Error types for the probe
//!
//! Every fallible operation in the crate returns [`Result`]. Error classes
//! mirror the failure surface a monitoring server distinguishes: bad request
//! shapes, connection establishment, data fetch, and result shaping.

/// Main error type for probe operations
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Unsupported metric: {0}")]
    UnsupportedMetric(String),

    #[error("Too many parameters")]
    TooManyParams,

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Cannot fetch data: {0}")]
    CannotFetchData(String),

    #[error("Cannot parse result: {0}")]
    CannotParseResult(String),

    #[error("Cannot marshal result: {0}")]
    CannotMarshal(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),
}

// Implement From conversions for common error types

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        Self::CannotParseResult(format!("JSON error: {}", err))
    }
}

impl From<bson::de::Error> for ProbeError {
    fn from(err: bson::de::Error) -> Self {
        Self::CannotParseResult(format!("BSON error: {}", err))
    }
}

/// Result type alias for probe operations
pub type Result<T> = std::result::Result<T, ProbeError>;
