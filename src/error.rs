//! Error types for Gatekeeper.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
///
/// A denied request is not an error; it is reported through
/// [`AdmissionDecision`](crate::ratelimit::AdmissionDecision).
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Limit values that cannot be applied
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration loading or parsing errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed request trace record
    #[error("Invalid trace record on line {line}: {source}")]
    Trace {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
