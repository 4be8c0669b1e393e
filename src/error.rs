//! Error types for chime relay

use thiserror::Error;

/// Result type alias for chime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in chime relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Wire protocol error (malformed or invalid message)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Channel (listener <-> relay connection) error
    #[error("channel error: {0}")]
    Channel(String),

    /// Voice connection error
    #[error("voice error: {0}")]
    Voice(String),

    /// Voice connection did not become ready in time
    #[error("voice connection to {destination} not ready after {timeout_ms}ms")]
    JoinTimeout {
        /// Requested destination
        destination: String,
        /// How long we waited
        timeout_ms: u64,
    },

    /// Audio decode or output error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
