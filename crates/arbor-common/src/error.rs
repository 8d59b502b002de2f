//! Error types for Arbor.

use thiserror::Error;

/// Result type alias using ArborError.
pub type Result<T> = std::result::Result<T, ArborError>;

/// Errors that can occur in Arbor operations.
#[derive(Debug, Error)]
pub enum ArborError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Node store errors
    #[error("Node not found: {id}")]
    NodeNotFound { id: u32 },

    #[error("Record corrupted: node {id}, reason: {reason}")]
    RecordCorrupted { id: u32, reason: String },

    #[error("Invalid node: {0}")]
    InvalidNode(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Tree index {index} out of range (trees: {trees})")]
    TreeIndexOutOfRange { index: usize, trees: usize },

    #[error("Lock acquisition failed: {0}")]
    LockFailed(String),

    #[error("Store already open: {0}")]
    StoreInUse(String),

    #[error("Append serializer stopped")]
    SerializerStopped,

    // Import errors
    #[error("Mapping not found for foreign index {index}")]
    MappingNotFound { index: usize },

    #[error("Parse error at line {line}: {reason}")]
    ParseError { line: usize, reason: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ArborError {
    fn from(err: serde_json::Error) -> Self {
        ArborError::ConfigError(err.to_string())
    }
}
