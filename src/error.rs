//! Error types for the DataStore plugin

use std::fmt;

use thiserror::Error;

/// Result type for DataStore operations
pub type Result<T> = std::result::Result<T, DataStoreError>;

/// Result type for storage engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Storage engine operation kinds
///
/// Used to tag engine failures and as the key of the mock engine's
/// responder table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOperation {
    StartSync,
    StopSync,
    Clear,
    Query,
}

impl fmt::Display for EngineOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineOperation::StartSync => "start_sync",
            EngineOperation::StopSync => "stop_sync",
            EngineOperation::Clear => "clear",
            EngineOperation::Query => "query",
        };
        f.write_str(name)
    }
}

/// Failure reported by a storage engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Local persistence failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote sync session failed
    #[error("Sync error: {0}")]
    Sync(String),

    /// Network unavailable or request failed
    #[error("Network error: {0}")]
    Network(String),

    /// Model payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Anything else the engine could not classify
    #[error("Internal engine error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

/// DataStore plugin error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataStoreError {
    /// Misuse of configure or lifecycle ordering, or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Lifecycle call before configure
    #[error("DataStore plugin is not configured")]
    NotConfigured,

    /// The engine factory failed to build a storage engine
    #[error("Failed to construct storage engine: {0}")]
    EngineConstruction(EngineError),

    /// A storage engine operation failed
    #[error("Storage engine {operation} failed: {source}")]
    EngineOperation {
        operation: EngineOperation,
        #[source]
        source: EngineError,
    },

    /// Query against a model that was never registered
    #[error("Model is not registered: {0}")]
    UnknownModel(String),

    /// Model payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publisher already finished; no further events are accepted
    #[error("Publisher has finished")]
    PublisherFinished,

    /// Condition fatal to the whole plugin instance
    #[error("DataStore plugin failed: {0}")]
    Fatal(String),
}

impl DataStoreError {
    pub(crate) fn engine(operation: EngineOperation, source: EngineError) -> Self {
        DataStoreError::EngineOperation { operation, source }
    }
}

impl From<serde_json::Error> for DataStoreError {
    fn from(err: serde_json::Error) -> Self {
        DataStoreError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DataStoreError {
    fn from(err: toml::de::Error) -> Self {
        DataStoreError::Configuration(err.to_string())
    }
}
