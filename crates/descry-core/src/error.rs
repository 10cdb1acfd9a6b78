//! Error types for Descry

use thiserror::Error;

/// Core error type for Descry operations
#[derive(Error, Debug)]
pub enum DescryError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Descry operations
pub type Result<T> = std::result::Result<T, DescryError>;
