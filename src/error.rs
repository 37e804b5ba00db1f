//! Error types for Tapedeck

use std::io;
use thiserror::Error;

/// Result type for Tapedeck operations
pub type Result<T> = std::result::Result<T, TapedeckError>;

/// Errors that can occur in Tapedeck
#[derive(Debug, Error)]
pub enum TapedeckError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid cassette file or stored body
    #[error("Invalid cassette format: {0}")]
    InvalidFormat(String),

    /// No cassette exists and the record mode forbids recording
    #[error("No recording found for cassette '{cassette}'")]
    NoRecording {
        /// Cassette name
        cassette: String,
    },

    /// Cassette exists but holds no interaction for the request
    #[error("Invalid request: {method} {url} was not found in the cassette")]
    RequestNotFound {
        /// Request method
        method: String,
        /// Request URL (after filtering)
        url: String,
    },

    /// A live call was required while recording is disabled
    #[error("Recording is disabled for this session")]
    RecordingDisabled,

    /// Record mode `all` combined with disabled recording
    #[error("Record mode 'all' requires recording to be enabled")]
    ConflictingRecordMode,

    /// Transport returned neither a response nor an error
    #[error("Failed to record because the transport returned no response")]
    MissingResponse,

    /// Invalid cassette name
    #[error("Invalid cassette name: {0}")]
    InvalidCassetteName(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl TapedeckError {
    /// Whether this error signals a missing or incomplete fixture rather than
    /// a runtime failure
    #[must_use]
    pub fn is_configuration_fault(&self) -> bool {
        matches!(
            self,
            Self::NoRecording { .. }
                | Self::RequestNotFound { .. }
                | Self::RecordingDisabled
                | Self::ConflictingRecordMode
                | Self::MissingResponse
        )
    }
}
