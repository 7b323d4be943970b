//! Core error types for stillwater-core.
//!
//! Every failure in the gateway is eventually absorbed into a conservative
//! fallback (cached destination or the native experience), but the layers
//! below the engine still report precisely what went wrong so it can be logged.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for stillwater-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Persistent store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Attribution endpoint errors
    #[error("Attribution error: {0}")]
    Attribution(#[from] AttributionFetchError),

    /// Remote config endpoint errors
    #[error("Remote config error: {0}")]
    RemoteConfig(#[from] ConfigFetchError),

    /// Browser surface errors
    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistent key-value store errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A stored value could not be decoded
    #[error("Corrupt value for key '{key}': {message}")]
    CorruptValue { key: String, message: String },

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(#[from] std::io::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),
}

/// Failures talking to the install-attribution identity endpoint.
#[derive(Error, Debug)]
pub enum AttributionFetchError {
    /// App id, dev key or device id is missing
    #[error("Attribution request is missing {0}")]
    MissingParameter(&'static str),

    /// Transport failure
    #[error("Attribution request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-200 response
    #[error("Attribution endpoint returned HTTP {0}")]
    Status(u16),

    /// Body was not a JSON object
    #[error("Attribution response is not a JSON object: {0}")]
    InvalidBody(String),
}

/// Failures talking to the remote config endpoint.
#[derive(Error, Debug)]
pub enum ConfigFetchError {
    /// No endpoint configured
    #[error("Remote config endpoint is not configured")]
    NotConfigured,

    /// Transport failure
    #[error("Remote config request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-200 response
    #[error("Remote config endpoint returned HTTP {0}")]
    Status(u16),

    /// Body did not match `{ok: true, url: string}`
    #[error("Unexpected remote config response: {0}")]
    InvalidBody(String),

    /// Server answered `ok: false`
    #[error("Remote config rejected the request")]
    Rejected,

    /// `url` field did not parse
    #[error("Remote config returned an invalid URL '{0}'")]
    InvalidUrl(String),
}

/// Browser surface errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// Script evaluation failed inside the surface
    #[error("Script evaluation failed: {0}")]
    Script(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    StorageError::Locked
                } else {
                    StorageError::QueryFailed(err.to_string())
                }
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Storage(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
