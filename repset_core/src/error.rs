//! Error types for the repset_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for repset_core operations
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

    /// Session state error (e.g. starting while a workout is in progress)
    #[error("State error: {0}")]
    State(String),

    /// Durable store rejected a write or could not be read
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// External integration failure (health, notifications, live countdown)
    #[error("Integration error: {0}")]
    Integration(String),

    /// Wrist-device channel failure
    #[error("Channel error: {0}")]
    Channel(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
