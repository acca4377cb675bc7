//! Error types for the scout_core library.
//!
//! The merge/classify/resolve engine itself never fails on incomplete input;
//! these errors surface only at the I/O seams (config, cache, journal, export).

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for scout_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot could not be read as a snapshot document
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
