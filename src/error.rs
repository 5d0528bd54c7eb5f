// Error types for the task store

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the store and its collaborators
#[derive(Debug, Error)]
pub enum StoreError {
    /// A task operation was attempted with no active user session
    #[error("Authentication required: you need to be logged in to {action}")]
    AuthRequired { action: &'static str },

    /// The persistence medium failed its self-test or is not reachable
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    /// Import payload failed to parse or lacks the expected shape
    #[error("Malformed import: {message}")]
    MalformedImport { message: String },

    /// A textual value could not be parsed into the named kind
    #[error("Invalid {kind}: '{value}'")]
    InvalidValue { kind: &'static str, value: String },

    /// A storage key is not usable as a key on this medium
    #[error("Invalid storage key: '{key}' ({reason})")]
    InvalidKey { key: String, reason: &'static str },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] serde_yaml::Error),
}

impl StoreError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedImport {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
        }
    }

    pub fn invalid(kind: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            kind,
            value: value.into(),
        }
    }
}
