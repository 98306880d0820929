//! Error types for i2ap

use thiserror::Error;

/// Result type alias for i2ap operations
pub type Result<T> = std::result::Result<T, I2apError>;

/// Main error type shared by the i2ap crates
#[derive(Error, Debug)]
pub enum I2apError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid job status: {0}")]
    InvalidStatus(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
