//! # Error Types
//!
//! Custom error types for the telemetry deriver using `thiserror`.

use thiserror::Error;

/// Main error type for the telemetry deriver
#[derive(Debug, Error)]
pub enum DeriverError {
    /// A signal could not be bound to a live producer
    #[error("Binding error: signal '{0}' is not available")]
    Binding(String),

    /// A raw telemetry value could not be converted for display
    #[error("Conversion error: cannot convert {value}: {reason}")]
    Conversion { value: f32, reason: String },

    /// No Tokio runtime is available to run listeners on
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transition record serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the telemetry deriver
pub type Result<T> = std::result::Result<T, DeriverError>;
